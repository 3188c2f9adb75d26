use crate::error::{Error, Result};
use crate::resource::{Algorithm, SearchObject};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{type_name, Any};
use std::marker::PhantomData;

/// Materializes stored payloads as plain [`serde_json::Value`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAlgorithm;

impl Algorithm for JsonAlgorithm {
    fn from_json(&self, json: &str) -> Result<SearchObject> {
        let value: Value = serde_json::from_str(json).map_err(Error::from_json)?;
        Ok(Box::new(value))
    }

    fn to_json(&self, object: &dyn Any) -> Result<String> {
        let value = expect_type::<Value>(object)?;
        Ok(value.to_string())
    }
}

/// Round-trips any serde type through its derived JSON shape.
pub struct SerdeAlgorithm<T> {
    marker: PhantomData<fn() -> T>,
}

impl<T> SerdeAlgorithm<T> {
    pub fn new() -> Self {
        Self {
            marker: PhantomData,
        }
    }
}

impl<T> Default for SerdeAlgorithm<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Algorithm for SerdeAlgorithm<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn from_json(&self, json: &str) -> Result<SearchObject> {
        let object: T = serde_json::from_str(json).map_err(Error::from_json)?;
        Ok(Box::new(object))
    }

    fn to_json(&self, object: &dyn Any) -> Result<String> {
        let object = expect_type::<T>(object)?;
        serde_json::to_string(object).map_err(Error::from_json)
    }
}

fn expect_type<T: Any>(object: &dyn Any) -> Result<&T> {
    object
        .downcast_ref::<T>()
        .ok_or_else(|| Error::malformed(format!("expected an object of type `{}`", type_name::<T>())))
}

#[cfg(test)]
mod tests {
    use super::{JsonAlgorithm, SerdeAlgorithm};
    use crate::error::Error;
    use crate::resource::Algorithm;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Encounter {
        uuid: String,
        location: String,
    }

    #[test]
    fn json_algorithm_round_trips_values() {
        let object = JsonAlgorithm.from_json(r#"{"uuid":"e-1"}"#).unwrap();
        let value = object.downcast_ref::<serde_json::Value>().unwrap();
        assert_eq!(value, &json!({"uuid": "e-1"}));
        assert_eq!(JsonAlgorithm.to_json(value).unwrap(), r#"{"uuid":"e-1"}"#);
    }

    #[test]
    fn serde_algorithm_materializes_typed_objects() {
        let algorithm = SerdeAlgorithm::<Encounter>::new();
        let object = algorithm
            .from_json(r#"{"uuid":"e-1","location":"Ward 3"}"#)
            .unwrap();
        let encounter = object.downcast::<Encounter>().unwrap();
        assert_eq!(encounter.location, "Ward 3");

        let json = algorithm.to_json(&*encounter).unwrap();
        assert!(json.contains("\"uuid\":\"e-1\""));
    }

    #[test]
    fn rejects_foreign_objects_and_bad_payloads() {
        let algorithm = SerdeAlgorithm::<Encounter>::new();
        assert!(matches!(
            algorithm.to_json(&42u8).unwrap_err(),
            Error::MalformedPayload(_)
        ));
        assert!(matches!(
            algorithm.from_json(r#"{"uuid":1}"#).unwrap_err(),
            Error::MalformedPayload(_)
        ));
    }
}
