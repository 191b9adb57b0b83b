use palette::Srgba;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Color components in the order they are validated.
const COMPONENTS: [&str; 4] = ["red", "green", "blue", "opacity"];

/// RGBA color as clients see it, every component within 0.0 - 1.0
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
pub struct Color {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub opacity: f64,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ColorError {
    #[error("Color is not an object")]
    NotAnObject,

    #[error("Color is missing property \"{0}\"")]
    MissingProperty(&'static str),

    #[error("Color.{0} is not a number")]
    NotANumber(&'static str),

    #[error("Color.{0} is not between 0.0 and 1.0")]
    OutOfRange(&'static str),
}

impl Color {
    pub const WHITE: Color = Color {
        red: 1.0,
        green: 1.0,
        blue: 1.0,
        opacity: 1.0,
    };

    pub fn new(red: f64, green: f64, blue: f64, opacity: f64) -> Self {
        Color {
            red,
            green,
            blue,
            opacity,
        }
    }

    /// Validates an untyped JSON color and reports the first violated
    /// constraint: object-ness, then presence, type and range of each
    /// component in turn.
    pub fn from_json(value: &Value) -> Result<Color, ColorError> {
        let object = value.as_object().ok_or(ColorError::NotAnObject)?;

        let mut components = [0.0; 4];
        for (component, key) in components.iter_mut().zip(COMPONENTS) {
            let value = object.get(key).ok_or(ColorError::MissingProperty(key))?;
            let number = value.as_f64().ok_or(ColorError::NotANumber(key))?;

            if !(0.0..=1.0).contains(&number) {
                return Err(ColorError::OutOfRange(key));
            }

            *component = number;
        }

        let [red, green, blue, opacity] = components;
        Ok(Color::new(red, green, blue, opacity))
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl From<Color> for Srgba {
    fn from(color: Color) -> Self {
        Srgba::new(
            color.red as f32,
            color.green as f32,
            color.blue as f32,
            color.opacity as f32,
        )
    }
}

/// Merged view of a device: what the radio reported combined with the
/// user's overrides.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub device_id: String,
    pub device_name: String,
    pub enabled: bool,
    pub color: Color,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn accepts_components_at_bounds() {
        let color = Color::from_json(&json!({
            "red": 0, "green": 1, "blue": 0.25, "opacity": 1.0
        }));

        assert_eq!(color, Ok(Color::new(0.0, 1.0, 0.25, 1.0)));
    }

    #[test]
    fn rejects_non_objects() {
        for value in [json!(null), json!("red"), json!([1, 1, 1, 1]), json!(0.5)] {
            assert_eq!(Color::from_json(&value), Err(ColorError::NotAnObject));
        }
    }

    #[test]
    fn reports_first_violation_in_component_order() {
        // green is out of range, but red is missing and is checked first
        let value = json!({ "green": 4, "blue": "x" });
        assert_eq!(
            Color::from_json(&value),
            Err(ColorError::MissingProperty("red"))
        );

        // red is fine, green is of the wrong type, blue is out of range
        let value = json!({ "red": 0.1, "green": "0.5", "blue": 7, "opacity": 1 });
        assert_eq!(Color::from_json(&value), Err(ColorError::NotANumber("green")));

        let value = json!({ "red": 0.1, "green": 0.2, "blue": 0.3, "opacity": -0.01 });
        assert_eq!(
            Color::from_json(&value),
            Err(ColorError::OutOfRange("opacity"))
        );
    }

    #[test]
    fn error_messages_name_the_component() {
        assert_eq!(
            ColorError::MissingProperty("blue").to_string(),
            "Color is missing property \"blue\""
        );
        assert_eq!(
            ColorError::NotANumber("red").to_string(),
            "Color.red is not a number"
        );
        assert_eq!(
            ColorError::OutOfRange("opacity").to_string(),
            "Color.opacity is not between 0.0 and 1.0"
        );
    }

    #[test]
    fn converts_to_srgba() {
        let srgba: Srgba = Color::new(0.5, 0.0, 1.0, 0.25).into();
        assert_eq!(srgba.into_components(), (0.5, 0.0, 1.0, 0.25));
    }

    #[test]
    fn device_view_uses_camel_case_keys() {
        let view = DeviceView {
            device_id: "d1".to_string(),
            device_name: "Lamp".to_string(),
            enabled: true,
            color: Color::WHITE,
        };

        assert_eq!(
            serde_json::to_value(view).unwrap(),
            json!({
                "deviceId": "d1",
                "deviceName": "Lamp",
                "enabled": true,
                "color": { "red": 1.0, "green": 1.0, "blue": 1.0, "opacity": 1.0 }
            })
        );
    }
}
