//! Step configuration types
//!
//! A step is a node of the dialogue graph. Its options are matched in list
//! order and the first match wins, so reordering options changes behavior.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};

/// Entry point of every new session
pub const ENTRY_STEP: &str = "inicio";
/// Farewell step, also used for the text appended when a session is closed
pub const FAREWELL_STEP: &str = "despedida";
/// Open question collecting the bank payment reference
pub const REFERENCE_STEP: &str = "pedir_referencia";
/// Choice steps whose selected option is the payment method
pub const PAYMENT_METHOD_STEPS: [&str; 2] = ["generar_factura_nueva", "reportar_pago"];

/// Open-question steps whose answer is also kept under a dedicated key
const CAPTURE_FIELDS: [(&str, &str); 4] = [
    (REFERENCE_STEP, "reference"),
    ("pedir_banco", "bank"),
    ("pedir_datos", "new_customer_name"),
    ("pedir_cedula_venta", "id_number"),
];

/// Temp-data keys the engine interprets
pub mod keys {
    pub const LAST_OPEN_ANSWER: &str = "last_open_answer";
    pub const REFERENCE: &str = "reference";
    pub const PAYMENT_METHOD: &str = "payment_method";
}

/// Temp-data field an open-question step writes its answer into, if any
pub fn capture_field(step_code: &str) -> Option<&'static str> {
    CAPTURE_FIELDS
        .iter()
        .find(|(code, _)| *code == step_code)
        .map(|(_, field)| *field)
}

/// System action attached to a step, resolved once when the step is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateTicket,
    QueryDebt,
    VerifyPayment,
    CloseSession,
    EscalateToHuman,
}

impl Action {
    /// Parse the identifier stored in the step table
    pub fn from_identifier(id: &str) -> Option<Self> {
        match id {
            "crear_ticket" => Some(Action::CreateTicket),
            "consultar_deuda" => Some(Action::QueryDebt),
            "verificar_pago_magico" => Some(Action::VerifyPayment),
            "cerrar_sesion" => Some(Action::CloseSession),
            "transferir_agente" => Some(Action::EscalateToHuman),
            _ => None,
        }
    }

    pub fn identifier(self) -> &'static str {
        match self {
            Action::CreateTicket => "crear_ticket",
            Action::QueryDebt => "consultar_deuda",
            Action::VerifyPayment => "verificar_pago_magico",
            Action::CloseSession => "cerrar_sesion",
            Action::EscalateToHuman => "transferir_agente",
        }
    }
}

/// A selectable choice of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOption {
    /// Display text, also the exact-match key when there is no pattern
    pub text: String,
    /// Destination step code
    pub next: String,
    /// Case-insensitive regular expression; replaces text equality when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl StepOption {
    pub fn new(text: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            next: next.into(),
            pattern: None,
        }
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    /// Whether `input` selects this option
    pub fn matches(&self, input: &str) -> Result<bool, regex::Error> {
        match &self.pattern {
            Some(pattern) => {
                let re = RegexBuilder::new(pattern).case_insensitive(true).build()?;
                Ok(re.is_match(input))
            }
            None => Ok(self.text.to_lowercase() == input.to_lowercase()),
        }
    }
}

/// A node of the dialogue graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub code: String,
    pub prompt: String,
    /// Open question: any input is the answer and the default next step follows
    pub is_question: bool,
    pub default_next: Option<String>,
    pub options: Vec<StepOption>,
    pub action: Option<Action>,
}

impl Step {
    pub fn question(code: impl Into<String>, prompt: impl Into<String>, next: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            prompt: prompt.into(),
            is_question: true,
            default_next: Some(next.into()),
            options: vec![],
            action: None,
        }
    }

    pub fn choice(code: impl Into<String>, prompt: impl Into<String>, options: Vec<StepOption>) -> Self {
        Self {
            code: code.into(),
            prompt: prompt.into(),
            is_question: false,
            default_next: None,
            options,
            action: None,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }
}

/// Prompt followed by the option list, if any
pub fn render(prompt: &str, options: &[StepOption]) -> String {
    if options.is_empty() {
        return prompt.to_string();
    }
    format!("{prompt}\n\nResponde con una opcion:\n{}", option_lines(options))
}

/// Reply for input that matched no option
pub fn render_reprompt(options: &[StepOption]) -> String {
    format!(
        "Ups, no entendi esa respuesta.\n\nPor favor, intenta con una de estas opciones:\n{}",
        option_lines(options)
    )
}

fn option_lines(options: &[StepOption]) -> String {
    options
        .iter()
        .map(|o| format!("- {}", o.text))
        .collect::<Vec<_>>()
        .join("\n")
}
