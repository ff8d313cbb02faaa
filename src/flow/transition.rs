//! Pure transition resolution
//!
//! Given the step a session is parked on, its temp data and the user's text,
//! decide where the conversation goes next. No I/O happens here; the engine
//! loads steps and persists the result.

use super::step::{capture_field, keys, render_reprompt, Step, PAYMENT_METHOD_STEPS};
use crate::db::TempData;
use thiserror::Error;

/// Outcome of matching user input against the current step
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Move to `next_step` with the updated temp data
    Advance { next_step: String, temp_data: TempData },
    /// Input matched no option: stay put and show the options again
    Reprompt { reply: String },
}

/// Configuration faults detected while resolving
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Step {0} is an open question without a default next step")]
    MissingDefaultNext(String),
    #[error("Option {text:?} of step {step} has an invalid pattern: {source}")]
    InvalidPattern {
        step: String,
        text: String,
        #[source]
        source: regex::Error,
    },
}

/// Resolve the transition out of `current` for `input`.
///
/// Deterministic: the same step, temp data and input always produce the same
/// resolution.
pub fn resolve(current: &Step, temp_data: &TempData, input: &str) -> Result<Resolution, TransitionError> {
    if current.is_question {
        return resolve_open_question(current, temp_data, input);
    }

    for option in &current.options {
        let matched = option.matches(input).map_err(|source| TransitionError::InvalidPattern {
            step: current.code.clone(),
            text: option.text.clone(),
            source,
        })?;
        if !matched {
            continue;
        }

        let mut temp_data = temp_data.clone();
        if PAYMENT_METHOD_STEPS.contains(&current.code.as_str()) {
            temp_data.set(keys::PAYMENT_METHOD, option.text.clone());
        }
        return Ok(Resolution::Advance {
            next_step: option.next.clone(),
            temp_data,
        });
    }

    Ok(Resolution::Reprompt {
        reply: render_reprompt(&current.options),
    })
}

fn resolve_open_question(
    current: &Step,
    temp_data: &TempData,
    input: &str,
) -> Result<Resolution, TransitionError> {
    let next_step = current
        .default_next
        .clone()
        .ok_or_else(|| TransitionError::MissingDefaultNext(current.code.clone()))?;

    let mut temp_data = temp_data.clone();
    temp_data.set(keys::LAST_OPEN_ANSWER, input);
    if let Some(field) = capture_field(&current.code) {
        temp_data.set(field, input);
    }

    Ok(Resolution::Advance { next_step, temp_data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::step::{StepOption, REFERENCE_STEP};

    fn menu() -> Step {
        Step::choice(
            "inicio",
            "Hola",
            vec![
                StepOption::new("1. Soporte", "soporte_menu").with_pattern(r"^\s*(1|soporte)\b"),
                StepOption::new("Deuda", "consultar_deuda"),
                StepOption::new("Cualquier cosa", "comodin").with_pattern(".*"),
            ],
        )
    }

    #[test]
    fn test_open_question_captures_reference() {
        let step = Step::question(REFERENCE_STEP, "Referencia?", "verificar_pago");
        let result = resolve(&step, &TempData::new(), "  00-1234 ").unwrap();

        let Resolution::Advance { next_step, temp_data } = result else {
            panic!("Expected Advance");
        };
        assert_eq!(next_step, "verificar_pago");
        assert_eq!(temp_data.get_str(keys::REFERENCE), Some("  00-1234 "));
        assert_eq!(temp_data.get_str(keys::LAST_OPEN_ANSWER), Some("  00-1234 "));
    }

    #[test]
    fn test_open_question_without_capture_field() {
        let step = Step::question("describir_falla", "Describe", "ticket_creado");
        let mut prior = TempData::new();
        prior.set("bank", "Banco Uno");

        let Resolution::Advance { temp_data, .. } = resolve(&step, &prior, "no hay luz").unwrap() else {
            panic!("Expected Advance");
        };
        assert_eq!(temp_data.get_str(keys::LAST_OPEN_ANSWER), Some("no hay luz"));
        assert_eq!(temp_data.get_str("bank"), Some("Banco Uno"));
        assert_eq!(temp_data.len(), 2);
    }

    #[test]
    fn test_open_question_requires_default_next() {
        let mut step = Step::question("pedir_banco", "Banco?", "x");
        step.default_next = None;
        assert!(matches!(
            resolve(&step, &TempData::new(), "Banco Uno"),
            Err(TransitionError::MissingDefaultNext(_))
        ));
    }

    #[test]
    fn test_first_matching_option_wins() {
        // "soporte" matches both the first pattern and the catch-all
        let Resolution::Advance { next_step, .. } = resolve(&menu(), &TempData::new(), "soporte").unwrap() else {
            panic!("Expected Advance");
        };
        assert_eq!(next_step, "soporte_menu");

        let Resolution::Advance { next_step, .. } = resolve(&menu(), &TempData::new(), "DEUDA").unwrap() else {
            panic!("Expected Advance");
        };
        assert_eq!(next_step, "consultar_deuda");
    }

    #[test]
    fn test_no_match_reprompts_with_options() {
        let step = Step::choice(
            "soporte_menu",
            "Que ocurre?",
            vec![StepOption::new("Lento", "a"), StepOption::new("Volver", "inicio")],
        );
        let result = resolve(&step, &TempData::new(), "no se").unwrap();

        let Resolution::Reprompt { reply } = result else {
            panic!("Expected Reprompt");
        };
        assert!(reply.contains("- Lento\n- Volver"));
    }

    #[test]
    fn test_payment_method_recorded() {
        let step = Step::choice(
            "reportar_pago",
            "Metodo?",
            vec![
                StepOption::new("1. Pago movil", "pedir_banco").with_pattern(r"^\s*1\b"),
                StepOption::new("2. Transferencia", "pedir_banco").with_pattern(r"^\s*2\b"),
            ],
        );
        let Resolution::Advance { temp_data, .. } = resolve(&step, &TempData::new(), "2").unwrap() else {
            panic!("Expected Advance");
        };
        assert_eq!(temp_data.get_str(keys::PAYMENT_METHOD), Some("2. Transferencia"));

        // Other choice steps leave the payment method alone
        let Resolution::Advance { temp_data, .. } = resolve(&menu(), &TempData::new(), "1").unwrap() else {
            panic!("Expected Advance");
        };
        assert_eq!(temp_data.get_str(keys::PAYMENT_METHOD), None);
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let step = Step::choice(
            "roto",
            "x",
            vec![StepOption::new("A", "a").with_pattern("(")],
        );
        assert!(matches!(
            resolve(&step, &TempData::new(), "A"),
            Err(TransitionError::InvalidPattern { .. })
        ));
    }
}
