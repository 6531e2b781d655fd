//! Normalizing wrappers over [`crate::validate`].
//!
//! Each function returns the cleaned value on acceptance or the validator's
//! rejection unchanged.

use crate::error::ValidationError;
use crate::validate::{
    validate_having_clauses, validate_identifier, validate_join_clause, validate_order_by,
};

/// Trims every name and checks it against the identifier grammar.
pub fn sanitize_column_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, ValidationError> {
    names
        .iter()
        .map(|n| {
            let trimmed = n.as_ref().trim();
            validate_identifier(trimmed)?;
            Ok(trimmed.to_string())
        })
        .collect()
}

/// Accepts `*` or a one or two segment dotted identifier (`column`, `table.column`).
pub fn sanitize_select_fields<S: AsRef<str>>(fields: &[S]) -> Result<Vec<String>, ValidationError> {
    fields
        .iter()
        .map(|f| sanitize_select_field(f.as_ref()))
        .collect()
}

fn sanitize_select_field(field: &str) -> Result<String, ValidationError> {
    let trimmed = field.trim();
    if trimmed == "*" {
        return Ok(trimmed.to_string());
    }
    let segments: Vec<&str> = trimmed.split('.').collect();
    if segments.len() > 2 {
        return Err(ValidationError::InvalidColumnName(trimmed.to_string()));
    }
    for segment in segments {
        validate_identifier(segment)?;
    }
    Ok(trimmed.to_string())
}

pub fn safe_order_by(clause: &str) -> Result<String, ValidationError> {
    validate_order_by(clause)?;
    Ok(clause.trim().to_string())
}

pub fn safe_join_clause(clause: &str) -> Result<String, ValidationError> {
    validate_join_clause(clause)?;
    Ok(clause.trim().to_string())
}

pub fn safe_select_fields<S: AsRef<str>>(fields: &[S]) -> Result<Vec<String>, ValidationError> {
    sanitize_select_fields(fields)
}

pub fn safe_group_by_fields<S: AsRef<str>>(fields: &[S]) -> Result<Vec<String>, ValidationError> {
    sanitize_column_names(fields)
}

pub fn safe_having_clauses<S: AsRef<str>>(clauses: &[S]) -> Result<Vec<String>, ValidationError> {
    validate_having_clauses(clauses)?;
    Ok(clauses.iter().map(|c| c.as_ref().trim().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_fields_round_trip() {
        assert_eq!(
            sanitize_select_fields(&["id", "name"]).unwrap(),
            vec!["id".to_string(), "name".to_string()]
        );
        assert_eq!(
            sanitize_select_fields(&[" * ", "users.id"]).unwrap(),
            vec!["*".to_string(), "users.id".to_string()]
        );
    }

    #[test]
    fn select_fields_reject_injection() {
        assert!(matches!(
            sanitize_select_fields(&["id; DROP TABLE x"]),
            Err(ValidationError::InvalidIdentifier(_))
        ));
        assert!(matches!(
            sanitize_select_fields(&["a.b.c"]),
            Err(ValidationError::InvalidColumnName(_))
        ));
        assert!(sanitize_select_fields(&["COUNT(*)"]).is_err());
        assert!(sanitize_select_fields(&["users."]).is_err());
    }

    #[test]
    fn column_names_are_trimmed() {
        assert_eq!(
            sanitize_column_names(&[" status ", "role"]).unwrap(),
            vec!["status".to_string(), "role".to_string()]
        );
        assert!(matches!(
            sanitize_column_names(&["ok", "bad name"]),
            Err(ValidationError::InvalidIdentifier(s)) if s == "bad name"
        ));
        assert!(sanitize_column_names::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn safe_wrappers_return_cleaned_values() {
        assert_eq!(safe_order_by(" name DESC ").unwrap(), "name DESC");
        assert_eq!(
            safe_join_clause("JOIN t ON t.id = x.id ").unwrap(),
            "JOIN t ON t.id = x.id"
        );
        assert_eq!(
            safe_having_clauses(&["COUNT(*) > ?"]).unwrap(),
            vec!["COUNT(*) > ?".to_string()]
        );
        assert!(safe_group_by_fields(&["users.id"]).is_err());
    }
}
