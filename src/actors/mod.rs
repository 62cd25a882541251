//! Actor-based scheduling
//!
//! ## Architecture Overview
//!
//! ```text
//!                 +-----------------+
//!                 |   Hub (main)    |
//!                 +--------+--------+
//!                          | spawns
//!                 +--------v--------+      ScanNow / UpdateInterval / Shutdown
//!                 |  ScannerActor   | <----------------------------------------- ScannerHandle
//!                 +--------+--------+
//!                          | run_scan (one at a time)
//!                 +--------v--------+
//!                 | ScanOrchestrator|
//!                 +--------+--------+
//!                          | ScanProgress
//!                 +--------v--------+
//!                 |Broadcast Channel| ---> subscribers (logs, tests)
//!                 +-----------------+
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: mpsc command channel for control messages
//! 2. **Events**: progress published to a broadcast channel for fan-out
//! 3. **Request/Response**: oneshot channels for `ScanNow` and `Shutdown`

pub mod messages;
pub mod scanner;

pub use messages::{ScanCommand, ScanProgress};
pub use scanner::{Schedule, ScannerActor, ScannerHandle};
