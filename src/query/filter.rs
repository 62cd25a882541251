//! Filter expressions for query results
//!
//! ## Syntax
//!
//! ```text
//! filter  = clause ("," clause)*
//! clause  = key op value
//! op      = "=" | "!=" | ">=" | "<=" | ">" | "<"
//! ```
//!
//! All clauses must hold. Keys are `id`, `owner` or an attribute name.
//! Ordering operators compare numerically; a field that is missing or not a
//! number never matches them. `key!=value` matches a missing field.
//!
//! ```
//! use reclaim_watch::query::filter::FilterExpr;
//!
//! let filter: FilterExpr = "size>=20,owner!=Knight".parse().unwrap();
//! assert_eq!(filter.clauses().len(), 2);
//! ```

use std::fmt;
use std::str::FromStr;

use crate::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Ge => ">=",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Lt => "<",
        }
    }

    fn is_numeric(self) -> bool {
        !matches!(self, Op::Eq | Op::Ne)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub key: String,
    pub op: Op,
    pub value: String,
}

impl Clause {
    pub fn matches(&self, entity: &Entity) -> bool {
        let field = match self.key.as_str() {
            "id" => Some(entity.id.as_str()),
            "owner" => entity.owner.as_deref(),
            attribute => entity.attributes.get(attribute).map(String::as_str),
        };

        let numbers = || {
            let actual = field?.trim().parse::<f64>().ok()?;
            let expected = self.value.parse::<f64>().ok()?;
            Some((actual, expected))
        };

        match self.op {
            Op::Eq => field == Some(self.value.as_str()),
            Op::Ne => field != Some(self.value.as_str()),
            Op::Ge => numbers().is_some_and(|(actual, expected)| actual >= expected),
            Op::Le => numbers().is_some_and(|(actual, expected)| actual <= expected),
            Op::Gt => numbers().is_some_and(|(actual, expected)| actual > expected),
            Op::Lt => numbers().is_some_and(|(actual, expected)| actual < expected),
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, self.op.symbol(), self.value)
    }
}

/// Conjunction of clauses; the empty expression matches everything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterExpr {
    clauses: Vec<Clause>,
}

impl FilterExpr {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        self.clauses.iter().all(|clause| clause.matches(entity))
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.clauses.iter().map(ToString::to_string).collect();
        write!(f, "{}", clauses.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterParseError {
    /// `a=1,,b=2`
    EmptyClause,

    MissingOperator(String),

    MissingKey(String),

    MissingValue(String),

    /// Ordering operator with a non-numeric right-hand side
    NotNumeric(String),
}

impl fmt::Display for FilterParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterParseError::EmptyClause => write!(f, "empty filter clause"),
            FilterParseError::MissingOperator(clause) => {
                write!(f, "no operator in filter clause '{}'", clause)
            }
            FilterParseError::MissingKey(clause) => {
                write!(f, "no key in filter clause '{}'", clause)
            }
            FilterParseError::MissingValue(clause) => {
                write!(f, "no value in filter clause '{}'", clause)
            }
            FilterParseError::NotNumeric(clause) => {
                write!(f, "comparison in '{}' needs a numeric value", clause)
            }
        }
    }
}

impl std::error::Error for FilterParseError {}

impl FromStr for FilterExpr {
    type Err = FilterParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        let clauses = input
            .split(',')
            .map(parse_clause)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clauses })
    }
}

fn parse_clause(raw: &str) -> Result<Clause, FilterParseError> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Err(FilterParseError::EmptyClause);
    }

    let start = clause
        .find(['!', '=', '<', '>'])
        .ok_or_else(|| FilterParseError::MissingOperator(clause.to_string()))?;
    let rest = &clause[start..];

    let (op, len) = if rest.starts_with("!=") {
        (Op::Ne, 2)
    } else if rest.starts_with(">=") {
        (Op::Ge, 2)
    } else if rest.starts_with("<=") {
        (Op::Le, 2)
    } else if rest.starts_with('=') {
        (Op::Eq, 1)
    } else if rest.starts_with('>') {
        (Op::Gt, 1)
    } else if rest.starts_with('<') {
        (Op::Lt, 1)
    } else {
        return Err(FilterParseError::MissingOperator(clause.to_string()));
    };

    let key = clause[..start].trim();
    let value = rest[len..].trim();

    if key.is_empty() {
        return Err(FilterParseError::MissingKey(clause.to_string()));
    }
    if value.is_empty() {
        return Err(FilterParseError::MissingValue(clause.to_string()));
    }
    if op.is_numeric() && value.parse::<f64>().is_err() {
        return Err(FilterParseError::NotNumeric(clause.to_string()));
    }

    Ok(Clause {
        key: key.to_string(),
        op,
        value: value.to_string(),
    })
}
