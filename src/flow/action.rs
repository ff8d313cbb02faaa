//! Action executor
//!
//! Runs the system action attached to the step a transition lands on. Every
//! action works through the caller's unit of work, so its writes commit or
//! roll back together with the transition.

use super::reconcile::{reconcile_payment, Reconciliation};
use super::step::{keys, Action, StepOption, ENTRY_STEP, FAREWELL_STEP, REFERENCE_STEP};
use crate::db::{DbResult, Invoice, SessionState, TempData, TicketPriority, UnitOfWork};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// Inputs an action may read
#[derive(Debug, Clone, Copy)]
pub struct ActionContext<'a> {
    pub session_id: i64,
    pub client_id: i64,
    /// Step the session was on before this transition
    pub prior_step: &'a str,
    /// The user text that triggered the transition
    pub user_text: &'a str,
    pub temp_data: &'a TempData,
    pub today: NaiveDate,
}

/// Observable result of an action, reported back to the channel adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SideEffect {
    TicketCreated { ticket_id: i64 },
    DebtQueried { open_invoices: usize, total: Decimal },
    PaymentSettled {
        amount: Decimal,
        invoice_id: i64,
        invoices_paid: usize,
    },
    PaymentRejected,
    SessionClosed,
    Escalated,
}

/// Overrides an action applies to the rendered step. `None` keeps the
/// step's own value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutcome {
    pub reply: Option<String>,
    pub options: Option<Vec<StepOption>>,
    pub next_step: Option<String>,
    pub state: Option<SessionState>,
    pub effect: Option<SideEffect>,
}

/// Execute `action` for a transition into the step whose prompt is `prompt`
pub fn execute(
    uow: &UnitOfWork<'_>,
    action: Action,
    prompt: &str,
    ctx: &ActionContext<'_>,
) -> DbResult<ActionOutcome> {
    tracing::debug!(session_id = ctx.session_id, action = action.identifier(), "Executing action");

    match action {
        Action::CreateTicket => create_ticket(uow, ctx),
        Action::QueryDebt => query_debt(uow, ctx),
        Action::VerifyPayment => verify_payment(uow, ctx),
        Action::CloseSession => {
            uow.set_session_state(ctx.session_id, SessionState::Closed)?;
            tracing::info!(session_id = ctx.session_id, "Session closed by flow");
            Ok(ActionOutcome {
                state: Some(SessionState::Closed),
                effect: Some(SideEffect::SessionClosed),
                ..ActionOutcome::default()
            })
        }
        Action::EscalateToHuman => {
            uow.set_session_state(ctx.session_id, SessionState::Escalated)?;
            tracing::info!(session_id = ctx.session_id, "Session escalated to a human agent");
            Ok(ActionOutcome {
                reply: Some(format!(
                    "{prompt}\n\nUn asesor se conectara contigo en breve. Por favor espera..."
                )),
                options: Some(vec![]),
                state: Some(SessionState::Escalated),
                effect: Some(SideEffect::Escalated),
                ..ActionOutcome::default()
            })
        }
    }
}

fn create_ticket(uow: &UnitOfWork<'_>, ctx: &ActionContext<'_>) -> DbResult<ActionOutcome> {
    let description = format!(
        "Reporte automatico en paso: {}. Mensaje: {}",
        ctx.prior_step, ctx.user_text
    );
    let ticket = uow.create_ticket(ctx.client_id, &description, TicketPriority::High)?;
    tracing::info!(client_id = ctx.client_id, ticket_id = ticket.id, "Support ticket created");

    Ok(ActionOutcome {
        effect: Some(SideEffect::TicketCreated { ticket_id: ticket.id }),
        ..ActionOutcome::default()
    })
}

fn query_debt(uow: &UnitOfWork<'_>, ctx: &ActionContext<'_>) -> DbResult<ActionOutcome> {
    let invoices = uow.open_invoices(ctx.client_id)?;
    let total: Decimal = invoices.iter().map(|invoice| invoice.amount).sum();
    let effect = Some(SideEffect::DebtQueried {
        open_invoices: invoices.len(),
        total,
    });

    if invoices.is_empty() {
        return Ok(ActionOutcome {
            reply: Some(
                "Estas al dia! No tienes ninguna factura pendiente de pago en este momento.\n\n\
                 Escribe Volver para ir al menu principal."
                    .to_string(),
            ),
            options: Some(vec![]),
            effect,
            ..ActionOutcome::default()
        });
    }

    Ok(ActionOutcome {
        reply: Some(debt_statement(&invoices, total)),
        effect,
        ..ActionOutcome::default()
    })
}

fn debt_statement(invoices: &[Invoice], total: Decimal) -> String {
    let lines = invoices
        .iter()
        .map(|invoice| format!("- {} -> ${}", invoice.description, invoice.amount))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "ESTADO DE CUENTA\n\nActualmente tienes {} factura(s) pendiente(s):\n\n{lines}\n\n\
         SUB-TOTAL A PAGAR: ${total}\n\n¿Deseas reportar un pago para cancelar este saldo?",
        invoices.len()
    )
}

fn verify_payment(uow: &UnitOfWork<'_>, ctx: &ActionContext<'_>) -> DbResult<ActionOutcome> {
    let reference = ctx.temp_data.get_str(keys::REFERENCE).unwrap_or_default();

    match reconcile_payment(uow, ctx.client_id, reference, ctx.today)? {
        Reconciliation::Settled {
            amount,
            invoice_id,
            invoices_paid,
        } => Ok(ActionOutcome {
            reply: Some(format!(
                "Excelente! Hemos verificado tu transferencia por ${amount} con el banco.\n\n\
                 Tu factura ha sido pagada y tu servicio esta procesado. Gracias por preferir UdoConnect!"
            )),
            options: Some(vec![
                StepOption::new("1. Volver al inicio", ENTRY_STEP),
                StepOption::new("2. Cerrar chat", FAREWELL_STEP),
            ]),
            effect: Some(SideEffect::PaymentSettled {
                amount,
                invoice_id,
                invoices_paid,
            }),
            ..ActionOutcome::default()
        }),
        Reconciliation::Insufficient { amount, debt } => {
            tracing::info!(session_id = ctx.session_id, amount = %amount, debt = %debt, "Payment rejected as insufficient");
            Ok(payment_rejected(reference))
        }
        Reconciliation::NotFound => Ok(payment_rejected(reference)),
    }
}

/// Same reply for unknown, used and insufficient payments; the session goes
/// back to collecting the reference
fn payment_rejected(reference: &str) -> ActionOutcome {
    ActionOutcome {
        reply: Some(format!(
            "No hemos podido encontrar un pago disponible con la referencia {reference} en nuestras \
             cuentas, o es posible que ya haya sido procesada.\n\n\
             Por favor, verifica el numero e intenta de nuevo."
        )),
        options: Some(vec![]),
        next_step: Some(REFERENCE_STEP.to_string()),
        effect: Some(SideEffect::PaymentRejected),
        ..ActionOutcome::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Channel, Database, InvoiceStatus};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    #[test]
    fn test_query_debt_without_invoices() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client = uow.upsert_client("1", "Ana").unwrap();
        let session = uow.create_session(client.id, Channel::Telegram).unwrap();
        let temp = TempData::new();
        let ctx = ActionContext {
            session_id: session.id,
            client_id: client.id,
            prior_step: "inicio",
            user_text: "2",
            temp_data: &temp,
            today: today(),
        };

        let outcome = execute(&uow, Action::QueryDebt, "Consultando...", &ctx).unwrap();
        assert!(outcome.reply.unwrap().starts_with("Estas al dia!"));
        assert_eq!(outcome.options, Some(vec![]));
        assert_eq!(
            outcome.effect,
            Some(SideEffect::DebtQueried {
                open_invoices: 0,
                total: Decimal::ZERO
            })
        );
    }

    #[test]
    fn test_query_debt_itemizes_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client = uow.upsert_client("2", "Beto").unwrap();
        let session = uow.create_session(client.id, Channel::Telegram).unwrap();
        let due = |m| NaiveDate::from_ymd_opt(2026, m, 1).unwrap();
        uow.insert_invoice(client.id, Decimal::new(1550, 2), "Febrero", due(2), InvoiceStatus::Pending)
            .unwrap();
        uow.insert_invoice(client.id, Decimal::new(20, 0), "Enero", due(1), InvoiceStatus::Overdue)
            .unwrap();
        let temp = TempData::new();
        let ctx = ActionContext {
            session_id: session.id,
            client_id: client.id,
            prior_step: "inicio",
            user_text: "2",
            temp_data: &temp,
            today: today(),
        };

        let outcome = execute(&uow, Action::QueryDebt, "Consultando...", &ctx).unwrap();
        let reply = outcome.reply.unwrap();
        assert!(reply.contains("tienes 2 factura(s)"));
        assert!(reply.contains("- Enero -> $20\n- Febrero -> $15.50"));
        assert!(reply.contains("SUB-TOTAL A PAGAR: $35.50"));
        // The step's own options (Si / Volver) stay
        assert_eq!(outcome.options, None);
    }

    #[test]
    fn test_create_ticket_embeds_prior_step() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client = uow.upsert_client("3", "Cris").unwrap();
        let session = uow.create_session(client.id, Channel::Web).unwrap();
        let temp = TempData::new();
        let ctx = ActionContext {
            session_id: session.id,
            client_id: client.id,
            prior_step: "describir_falla",
            user_text: "sin luz en el router",
            temp_data: &temp,
            today: today(),
        };

        let outcome = execute(&uow, Action::CreateTicket, "Registrado", &ctx).unwrap();
        assert!(outcome.reply.is_none());

        let tickets = uow.tickets(client.id).unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(
            tickets[0].description,
            "Reporte automatico en paso: describir_falla. Mensaje: sin luz en el router"
        );
        assert_eq!(tickets[0].priority, TicketPriority::High);
    }

    #[test]
    fn test_verify_payment_failure_redirects_to_reference() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client = uow.upsert_client("4", "Dani").unwrap();
        let session = uow.create_session(client.id, Channel::Telegram).unwrap();
        let mut temp = TempData::new();
        temp.set(keys::REFERENCE, "999");
        let ctx = ActionContext {
            session_id: session.id,
            client_id: client.id,
            prior_step: REFERENCE_STEP,
            user_text: "999",
            temp_data: &temp,
            today: today(),
        };

        let outcome = execute(&uow, Action::VerifyPayment, "Verificando...", &ctx).unwrap();
        assert!(outcome.reply.unwrap().contains("con la referencia 999"));
        assert_eq!(outcome.next_step.as_deref(), Some(REFERENCE_STEP));
        assert_eq!(outcome.options, Some(vec![]));
        assert_eq!(outcome.effect, Some(SideEffect::PaymentRejected));
    }

    #[test]
    fn test_escalation_and_close_change_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client = uow.upsert_client("5", "Eva").unwrap();
        let session = uow.create_session(client.id, Channel::Web).unwrap();
        let temp = TempData::new();
        let ctx = ActionContext {
            session_id: session.id,
            client_id: client.id,
            prior_step: "inicio",
            user_text: "5",
            temp_data: &temp,
            today: today(),
        };

        let outcome = execute(&uow, Action::EscalateToHuman, "Te transferimos.", &ctx).unwrap();
        assert_eq!(
            outcome.reply.as_deref(),
            Some("Te transferimos.\n\nUn asesor se conectara contigo en breve. Por favor espera...")
        );
        assert_eq!(uow.get_session(session.id).unwrap().state, SessionState::Escalated);

        let outcome = execute(&uow, Action::CloseSession, "Adios", &ctx).unwrap();
        assert_eq!(outcome.state, Some(SessionState::Closed));
        assert!(outcome.reply.is_none());
        assert_eq!(uow.get_session(session.id).unwrap().state, SessionState::Closed);
    }
}
