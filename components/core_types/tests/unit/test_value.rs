//! Unit tests for the Value enum

use core_types::{format_number, Value, ValueId};

#[cfg(test)]
mod value_creation_tests {
    use super::*;

    #[test]
    fn test_default_is_undefined() {
        assert!(matches!(Value::default(), Value::Undefined));
    }

    #[test]
    fn test_string_constructor() {
        let val = Value::string("hello");
        assert_eq!(val.as_str(), Some("hello"));
    }

    #[test]
    fn test_ref_handle() {
        let val = Value::Ref(ValueId(12));
        assert_eq!(val.as_ref_id(), Some(ValueId(12)));
        assert_eq!(Value::Null.as_ref_id(), None);
    }
}

#[cfg(test)]
mod value_semantics_tests {
    use super::*;

    #[test]
    fn test_nullish() {
        assert!(Value::Null.is_nullish());
        assert!(Value::Undefined.is_nullish());
        assert!(!Value::Boolean(false).is_nullish());
    }

    #[test]
    fn test_empty_string_is_falsy() {
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("false").is_truthy());
    }

    #[test]
    fn test_cross_variant_inequality() {
        assert_ne!(Value::Number(0.0), Value::Boolean(false));
        assert_ne!(Value::Null, Value::Undefined);
        assert_ne!(Value::string("1"), Value::Number(1.0));
    }

    #[test]
    fn test_primitive_type_names() {
        assert_eq!(Value::Undefined.primitive_type_name(), "undefined");
        assert_eq!(Value::Number(1.0).primitive_type_name(), "number");
        assert_eq!(Value::Ref(ValueId(0)).primitive_type_name(), "object");
    }
}

#[cfg(test)]
mod number_format_tests {
    use super::*;

    #[test]
    fn test_integral_numbers() {
        assert_eq!(format_number(-17.0), "-17");
        assert_eq!(format_number(1024.0), "1024");
    }

    #[test]
    fn test_fractional_numbers() {
        assert_eq!(format_number(0.1), "0.1");
        assert_eq!(format_number(3.25), "3.25");
    }
}
