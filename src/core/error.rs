/// Failures raised before any simulation work starts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid configuration: {field} {message}")]
    Configuration {
        field: &'static str,
        message: String,
    },

    #[error("invalid market data: {0}")]
    Data(String),
}

impl SimulationError {
    pub(crate) fn config(field: &'static str, message: impl Into<String>) -> Self {
        SimulationError::Configuration {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn data(message: impl Into<String>) -> Self {
        SimulationError::Data(message.into())
    }
}
