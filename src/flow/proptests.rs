//! Property-based tests for transition resolution
//!
//! These tests verify key invariants hold across all possible inputs.

use super::step::{capture_field, keys, Step, StepOption, PAYMENT_METHOD_STEPS, REFERENCE_STEP};
use super::transition::{resolve, Resolution};
use crate::db::TempData;
use proptest::prelude::*;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_temp_data() -> impl Strategy<Value = TempData> {
    proptest::collection::vec(("[a-z_]{1,10}", "[a-zA-Z0-9 ]{0,20}"), 0..4).prop_map(|pairs| {
        let mut temp = TempData::new();
        for (key, value) in pairs {
            temp.set(&key, value);
        }
        temp
    })
}

fn arb_option() -> impl Strategy<Value = StepOption> {
    (
        "[A-Z][a-z]{0,8}",
        "[a-z_]{1,12}",
        proptest::option::of(prop_oneof![
            Just(r"^\s*1\b".to_string()),
            Just("^si$".to_string()),
            Just("volver".to_string()),
        ]),
    )
        .prop_map(|(text, next, pattern)| StepOption {
            text,
            next,
            pattern,
        })
}

fn arb_choice_step() -> impl Strategy<Value = Step> {
    (
        prop_oneof![
            Just("inicio".to_string()),
            Just("reportar_pago".to_string()),
            Just("soporte_menu".to_string()),
        ],
        proptest::collection::vec(arb_option(), 0..5),
    )
        .prop_map(|(code, options)| Step::choice(code, "prompt", options))
}

fn arb_question_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(REFERENCE_STEP),
        Just("pedir_banco"),
        Just("pedir_datos"),
        Just("pedir_cedula_venta"),
        Just("describir_falla"),
    ]
    .prop_map(|code| Step::question(code, "prompt", "siguiente"))
}

fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,20}",
        Just("1".to_string()),
        Just("SI".to_string()),
        Just("Volver".to_string()),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_resolution_is_deterministic(
        step in prop_oneof![arb_choice_step(), arb_question_step()],
        temp in arb_temp_data(),
        input in arb_input(),
    ) {
        let first = resolve(&step, &temp, &input).unwrap();
        let second = resolve(&step, &temp, &input).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_choice_resolution_follows_first_match(
        step in arb_choice_step(),
        temp in arb_temp_data(),
        input in arb_input(),
    ) {
        let first_match = step.options.iter().find(|o| o.matches(&input).unwrap());

        match (resolve(&step, &temp, &input).unwrap(), first_match) {
            (Resolution::Advance { next_step, temp_data }, Some(option)) => {
                prop_assert_eq!(&next_step, &option.next);
                if PAYMENT_METHOD_STEPS.contains(&step.code.as_str()) {
                    prop_assert_eq!(temp_data.get_str(keys::PAYMENT_METHOD), Some(option.text.as_str()));
                } else {
                    prop_assert_eq!(temp_data, temp);
                }
            }
            (Resolution::Reprompt { reply }, None) => {
                for option in &step.options {
                    let line = format!("- {}", option.text);
                    prop_assert!(reply.contains(&line));
                }
            }
            (resolution, option) => {
                prop_assert!(false, "resolution {:?} disagrees with first match {:?}", resolution, option);
            }
        }
    }

    #[test]
    fn prop_open_question_captures_verbatim(
        step in arb_question_step(),
        temp in arb_temp_data(),
        input in ".{0,30}",
    ) {
        let Resolution::Advance { next_step, temp_data } = resolve(&step, &temp, &input).unwrap() else {
            return Err(TestCaseError::fail("open question must always advance"));
        };

        prop_assert_eq!(next_step, "siguiente");
        prop_assert_eq!(temp_data.get_str(keys::LAST_OPEN_ANSWER), Some(input.as_str()));
        if let Some(field) = capture_field(&step.code) {
            prop_assert_eq!(temp_data.get_str(field), Some(input.as_str()));
        }
    }
}
