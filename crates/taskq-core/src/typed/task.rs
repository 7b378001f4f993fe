//! TypedTask - binds a task name to a payload type.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{QueueError, TaskData};

/// A payload type that always travels under the same task name.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct CustomerUpdate {
///     customer_id: i64,
/// }
///
/// impl TypedTask for CustomerUpdate {
///     const NAME: &'static str = "customer_update";
/// }
/// ```
///
/// The payload must serialize to a JSON object: its fields become the
/// task's data entries.
pub trait TypedTask: Serialize + DeserializeOwned + Send + Sync + 'static {
    const NAME: &'static str;

    fn encode(&self) -> Result<TaskData, QueueError> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(QueueError::Decode(format!(
                "payload for {} must serialize to an object, got {other}",
                Self::NAME
            ))),
        }
    }

    fn decode(data: &TaskData) -> Result<Self, QueueError> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            data.clone(),
        ))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        number: u32,
        paid: bool,
    }

    impl TypedTask for Invoice {
        const NAME: &'static str = "invoice_sync";
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Bare(u32);

    impl TypedTask for Bare {
        const NAME: &'static str = "bare";
    }

    #[test]
    fn payload_fields_become_data_entries() {
        let data = Invoice {
            number: 7,
            paid: false,
        }
        .encode()
        .unwrap();
        assert_eq!(data["number"], json!(7));
        assert_eq!(Invoice::decode(&data).unwrap().number, 7);
    }

    #[test]
    fn non_object_payloads_are_rejected() {
        assert!(matches!(Bare(3).encode(), Err(QueueError::Decode(_))));
    }

    #[test]
    fn missing_fields_fail_to_decode() {
        let mut data = TaskData::new();
        data.insert("number".into(), json!(1));
        assert!(matches!(Invoice::decode(&data), Err(QueueError::Decode(_))));
    }
}
