use serde_json::{Map, Value};

/// Key the emitter writes the event name under before delivery.
pub const TYPE_KEY: &str = "type";

/// Key a non-object payload is stored under once wrapped.
pub const VALUE_KEY: &str = "value";

/// Build the value handed to listeners of `event`.
///
/// Objects get `type` set (overwriting any caller value), `None` and `null`
/// become `{"type": event}`, any other value is wrapped as
/// `{"type": event, "value": payload}`.
pub fn with_type(event: &str, payload: Option<Value>) -> Value {
    let mut object = match payload {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            map.insert(VALUE_KEY.to_string(), other);
            map
        }
    };
    object.insert(TYPE_KEY.to_string(), Value::String(event.to_string()));
    Value::Object(object)
}
