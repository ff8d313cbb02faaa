//! Default dialogue graph installed on an empty step table

use super::{Database, DbError, DbResult};
use crate::flow::{Action, Step, StepOption};

/// Install the default flow unless steps are already configured.
/// Returns the number of steps written.
pub fn seed_default_flow(db: &Database) -> DbResult<usize> {
    db.transaction(|uow| {
        if uow.step_count()? > 0 {
            return Ok(0);
        }
        let steps = default_flow();
        for step in &steps {
            uow.save_step(step)?;
        }
        tracing::info!(count = steps.len(), "Seeded default flow");
        Ok::<_, DbError>(steps.len())
    })
}

fn back_or_close() -> Vec<StepOption> {
    vec![
        StepOption::new("1. Volver al inicio", "inicio").with_pattern(r"^\s*(1|volver|inicio)\b"),
        StepOption::new("2. Cerrar chat", "despedida").with_pattern(r"^\s*(2|cerrar|salir)\b"),
    ]
}

fn payment_methods() -> Vec<StepOption> {
    vec![
        StepOption::new("1. Pago movil", "pedir_banco").with_pattern(r"^\s*(1|pago m[oó]vil)\b"),
        StepOption::new("2. Transferencia", "pedir_banco").with_pattern(r"^\s*(2|transferencia)\b"),
    ]
}

#[allow(clippy::too_many_lines)]
pub(crate) fn default_flow() -> Vec<Step> {
    vec![
        Step::choice(
            "inicio",
            "¡Hola! Bienvenido a UdoConnect, tu proveedor de internet. ¿En que podemos ayudarte hoy?",
            vec![
                StepOption::new("1. Soporte tecnico", "soporte_menu").with_pattern(r"^\s*(1|soporte)\b"),
                StepOption::new("2. Consultar deuda", "consultar_deuda")
                    .with_pattern(r"^\s*(2|deuda|consultar)\b"),
                StepOption::new("3. Reportar pago", "reportar_pago").with_pattern(r"^\s*(3|reportar|pago)\b"),
                StepOption::new("4. Contratar servicio", "pedir_datos").with_pattern(r"^\s*(4|contratar)\b"),
                StepOption::new("5. Hablar con un asesor", "transferir_asesor")
                    .with_pattern(r"^\s*(5|asesor)\b"),
                StepOption::new("6. Salir", "despedida").with_pattern(r"^\s*(6|salir|adios)\b"),
            ],
        ),
        // Technical support
        Step::choice(
            "soporte_menu",
            "Cuentanos que ocurre con tu servicio:",
            vec![
                StepOption::new("1. Sin conexion", "describir_falla").with_pattern(r"^\s*(1|sin conexi[oó]n)\b"),
                StepOption::new("2. Internet lento", "describir_falla").with_pattern(r"^\s*(2|lento)\b"),
                StepOption::new("3. Volver", "inicio").with_pattern(r"^\s*(3|volver)\b"),
            ],
        ),
        Step::question(
            "describir_falla",
            "Describe brevemente la falla (desde cuando ocurre y que luces ves en el equipo):",
            "ticket_creado",
        ),
        Step::choice(
            "ticket_creado",
            "Hemos registrado tu reporte con prioridad alta. Un tecnico te contactara pronto.",
            back_or_close(),
        )
        .with_action(Action::CreateTicket),
        // Billing
        Step::choice(
            "consultar_deuda",
            "Consultando tu estado de cuenta...",
            vec![
                StepOption::new("Si", "reportar_pago").with_pattern(r"^\s*(s[ií]|reportar)\b"),
                StepOption::new("Volver", "inicio").with_pattern(r"^\s*(no|volver)\b"),
            ],
        )
        .with_action(Action::QueryDebt),
        Step::choice(
            "reportar_pago",
            "¿Con que metodo realizaste el pago?",
            payment_methods(),
        ),
        Step::question("pedir_banco", "¿Desde que banco realizaste el pago?", "pedir_referencia"),
        Step::question(
            "pedir_referencia",
            "Indica el numero de referencia de la operacion:",
            "verificar_pago",
        ),
        Step::choice("verificar_pago", "Verificando tu pago...", back_or_close())
            .with_action(Action::VerifyPayment),
        // New service sales
        Step::question(
            "pedir_datos",
            "Para contratar el servicio necesitamos algunos datos. ¿Cual es tu nombre completo?",
            "pedir_cedula_venta",
        ),
        Step::question("pedir_cedula_venta", "Indica tu numero de cedula:", "generar_factura_nueva"),
        Step::choice(
            "generar_factura_nueva",
            "La instalacion y el primer mes tienen un costo de $30. ¿Como deseas pagar?",
            payment_methods(),
        ),
        // Hand-off and farewell
        Step::choice("transferir_asesor", "Te estamos transfiriendo con un asesor.", vec![])
            .with_action(Action::EscalateToHuman),
        Step::choice(
            "despedida",
            "Gracias por comunicarte con UdoConnect. ¡Hasta pronto!",
            vec![],
        )
        .with_action(Action::CloseSession),
    ]
}
