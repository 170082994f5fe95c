//! Parameter validation against a schema.
//!
//! [`verify_params`] is used everywhere structured parameters enter the hub:
//! device creation, discovery, action execution and plugin configuration.
//! Its output is the *effective* parameter list (coerced values plus
//! materialised defaults), which downstream calls use instead of the input.

use std::cmp::Ordering;

use tracing::warn;

use crate::error::{DeviceError, DeviceResult};
use crate::params::{Param, ParamList};
use crate::types::ParamType;

/// Verify `params` against `schema`.
///
/// Every supplied parameter must be declared in the schema, convertible to
/// its declared kind, inside declared bounds, and in the allowed-value set
/// when one is declared. With `require_all`, every declared parameter must
/// end up present: omitted parameters with a default are filled in, omitted
/// parameters without one fail with [`DeviceError::MissingParameter`].
pub fn verify_params(
    schema: &[ParamType],
    params: &ParamList,
    require_all: bool,
) -> DeviceResult<ParamList> {
    let mut effective = ParamList::new();

    for param in params {
        let param_type = schema
            .iter()
            .find(|t| t.name == param.name)
            .ok_or_else(|| {
                warn!(name = %param.name, "parameter is not declared in the schema");
                DeviceError::UnknownParameter(param.name.clone())
            })?;
        effective.set(verify_param(param_type, param)?);
    }

    if require_all {
        for param_type in schema {
            if effective.contains(&param_type.name) {
                continue;
            }
            match &param_type.default_value {
                Some(default) => {
                    effective.set(Param::new(param_type.name.clone(), default.clone()));
                }
                None => {
                    warn!(name = %param_type.name, "missing parameter");
                    return Err(DeviceError::MissingParameter(param_type.name.clone()));
                }
            }
        }
    }

    Ok(effective)
}

/// Check a single parameter against its type and return the coerced value.
fn verify_param(param_type: &ParamType, param: &Param) -> DeviceResult<Param> {
    let invalid = |reason: &str| {
        warn!(name = %param.name, reason, "invalid parameter");
        DeviceError::InvalidParameter {
            name: param.name.clone(),
            reason: reason.to_string(),
        }
    };

    let value = param.value.coerce_to(param_type.kind).ok_or_else(|| {
        invalid(&format!(
            "expected {}, got {}",
            param_type.kind,
            param.value.type_name()
        ))
    })?;

    if let Some(min) = &param_type.min {
        match value.compare(min) {
            Some(Ordering::Less) => return Err(invalid("below minimum")),
            Some(_) => {}
            None => return Err(invalid("not comparable to minimum")),
        }
    }
    if let Some(max) = &param_type.max {
        match value.compare(max) {
            Some(Ordering::Greater) => return Err(invalid("above maximum")),
            Some(_) => {}
            None => return Err(invalid("not comparable to maximum")),
        }
    }

    if !param_type.allowed_values.is_empty() && !param_type.allowed_values.contains(&value) {
        return Err(invalid("not in the allowed values"));
    }

    Ok(Param::new(param.name.clone(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamKind, ParamValue};

    fn int_schema() -> Vec<ParamType> {
        vec![ParamType::new("level", ParamKind::Int)
            .with_min(0i64)
            .with_max(10i64)
            .with_default_value(3i64)]
    }

    #[test]
    fn test_accepts_value_in_range() {
        let params = ParamList::new().with("level", 7i64);
        let effective = verify_params(&int_schema(), &params, true).unwrap();
        assert_eq!(effective.value("level"), Some(&ParamValue::Int(7)));
    }

    #[test]
    fn test_rejects_value_above_max() {
        let params = ParamList::new().with("level", 42i64);
        let err = verify_params(&int_schema(), &params, true).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_wrong_type() {
        let params = ParamList::new().with("level", "loud");
        let err = verify_params(&int_schema(), &params, false).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter { .. }));
    }

    #[test]
    fn test_rejects_undeclared_param() {
        let params = ParamList::new().with("volume", 1i64);
        let err = verify_params(&int_schema(), &params, false).unwrap_err();
        assert_eq!(err, DeviceError::UnknownParameter("volume".to_string()));
    }

    #[test]
    fn test_materialises_default() {
        let effective = verify_params(&int_schema(), &ParamList::new(), true).unwrap();
        assert_eq!(effective.value("level"), Some(&ParamValue::Int(3)));
    }

    #[test]
    fn test_missing_without_default() {
        let schema = vec![ParamType::new("host", ParamKind::String)];
        let err = verify_params(&schema, &ParamList::new(), true).unwrap_err();
        assert_eq!(err, DeviceError::MissingParameter("host".to_string()));
    }

    #[test]
    fn test_require_all_yields_one_param_per_type() {
        let schema = vec![
            ParamType::new("a", ParamKind::Int).with_default_value(1i64),
            ParamType::new("b", ParamKind::Bool).with_default_value(false),
        ];
        let params = ParamList::new().with("a", 9i64);
        let effective = verify_params(&schema, &params, true).unwrap();
        assert_eq!(effective.len(), schema.len());
        for param_type in &schema {
            assert!(effective.contains(&param_type.name));
        }
    }

    #[test]
    fn test_allowed_values() {
        let schema = vec![ParamType::new("mode", ParamKind::String).with_allowed_values(vec![
            ParamValue::String("eco".into()),
            ParamValue::String("boost".into()),
        ])];
        let ok = ParamList::new().with("mode", "eco");
        assert!(verify_params(&schema, &ok, false).is_ok());

        let bad = ParamList::new().with("mode", "turbo");
        assert!(verify_params(&schema, &bad, false).is_err());
    }

    #[test]
    fn test_numeric_widening_is_coerced() {
        let schema = vec![ParamType::new("factor", ParamKind::Double).with_max(1.5f64)];
        let params = ParamList::new().with("factor", 1i64);
        let effective = verify_params(&schema, &params, false).unwrap();
        assert_eq!(effective.value("factor"), Some(&ParamValue::Double(1.0)));
    }
}
