//! Rule-string parsing: `"string|required|minlength:2"` → tokens.

use crate::value::FieldType;
use crate::SchemaError;

/// One parsed rule token from a `|`-delimited rule string.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleToken {
    Type(FieldType),
    Required,
    Optional,
    Default(String),
    Min(f64),
    Max(f64),
    MinLength(usize),
    MaxLength(usize),
    Email,
    Url,
    Items(String),
}

pub fn parse_rule_tokens(rule: &str) -> Result<Vec<RuleToken>, SchemaError> {
    rule.split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_one)
        .collect()
}

fn parse_one(token: &str) -> Result<RuleToken, SchemaError> {
    if let Some(ft) = FieldType::parse(token) {
        return Ok(RuleToken::Type(ft));
    }
    match token {
        "required" => return Ok(RuleToken::Required),
        "optional" => return Ok(RuleToken::Optional),
        "email" => return Ok(RuleToken::Email),
        "url" => return Ok(RuleToken::Url),
        _ => {}
    }
    if let Some((key, arg)) = token.split_once(':') {
        return match key {
            "default" => Ok(RuleToken::Default(arg.to_string())),
            "min" => arg
                .parse::<f64>()
                .map(RuleToken::Min)
                .map_err(|_| SchemaError::InvalidRule(token.to_string())),
            "max" => arg
                .parse::<f64>()
                .map(RuleToken::Max)
                .map_err(|_| SchemaError::InvalidRule(token.to_string())),
            "minlength" => arg
                .parse::<usize>()
                .map(RuleToken::MinLength)
                .map_err(|_| SchemaError::InvalidRule(token.to_string())),
            "maxlength" => arg
                .parse::<usize>()
                .map(RuleToken::MaxLength)
                .map_err(|_| SchemaError::InvalidRule(token.to_string())),
            "items" => Ok(RuleToken::Items(arg.to_string())),
            _ => Err(SchemaError::InvalidRule(token.to_string())),
        };
    }
    Err(SchemaError::InvalidRule(token.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_type_and_modifiers() {
        let tokens = parse_rule_tokens("string|required|minlength:2").unwrap();
        assert_eq!(
            tokens,
            vec![RuleToken::Type(FieldType::String), RuleToken::Required, RuleToken::MinLength(2)]
        );
    }

    #[test]
    fn parses_items_rule() {
        let tokens = parse_rule_tokens("array|items:number").unwrap();
        assert_eq!(tokens, vec![RuleToken::Type(FieldType::Array), RuleToken::Items("number".into())]);
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse_rule_tokens("string|bogus").is_err());
    }

    #[test]
    fn rejects_non_numeric_min() {
        assert!(parse_rule_tokens("number|min:abc").is_err());
    }
}
