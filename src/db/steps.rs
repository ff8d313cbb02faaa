//! Step repository: read access to the dialogue configuration

use super::{DbResult, UnitOfWork};
use crate::flow::{Action, Step, StepOption};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

impl UnitOfWork<'_> {
    /// Load a step by code. Unknown action identifiers resolve to no action.
    pub fn find_step(&self, code: &str) -> DbResult<Option<Step>> {
        let mut stmt = self.conn().prepare(
            "SELECT code, prompt, is_question, default_next, options, action FROM steps WHERE code = ?1",
        )?;

        let step = stmt
            .query_row(params![code], |row| {
                let options_json: String = row.get(4)?;
                let options: Vec<StepOption> = serde_json::from_str(&options_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e))
                })?;
                let action_id: Option<String> = row.get(5)?;

                Ok(Step {
                    code: row.get(0)?,
                    prompt: row.get(1)?,
                    is_question: row.get(2)?,
                    default_next: row.get(3)?,
                    options,
                    action: action_id.as_deref().and_then(|id| {
                        let action = Action::from_identifier(id);
                        if action.is_none() {
                            tracing::warn!(step = %code, action = %id, "Unknown action identifier, ignoring");
                        }
                        action
                    }),
                })
            })
            .optional()?;

        Ok(step)
    }

    /// Insert or replace a step definition
    pub fn save_step(&self, step: &Step) -> DbResult<()> {
        let options_json = serde_json::to_string(&step.options)?;
        self.conn().execute(
            "INSERT OR REPLACE INTO steps (code, prompt, is_question, default_next, options, action)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                step.code,
                step.prompt,
                step.is_question,
                step.default_next,
                options_json,
                step.action.map(Action::identifier),
            ],
        )?;
        Ok(())
    }

    pub fn step_count(&self) -> DbResult<i64> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM steps", [], |row| row.get(0))?)
    }
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::flow::{Action, Step, StepOption};

    #[test]
    fn test_save_and_find_step() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();

        let step = Step {
            code: "consultar_deuda".to_string(),
            prompt: "Consultando...".to_string(),
            is_question: false,
            default_next: None,
            options: vec![StepOption::new("Volver", "inicio").with_pattern("^volver$")],
            action: Some(Action::QueryDebt),
        };
        uow.save_step(&step).unwrap();

        let loaded = uow.find_step("consultar_deuda").unwrap().unwrap();
        assert_eq!(loaded, step);
        assert!(uow.find_step("missing").unwrap().is_none());
    }

    #[test]
    fn test_unknown_action_is_no_op() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();

        uow.conn()
            .execute(
                "INSERT INTO steps (code, prompt, is_question, options, action)
                 VALUES ('raro', 'texto', 0, '[]', 'enviar_fax')",
                [],
            )
            .unwrap();

        let step = uow.find_step("raro").unwrap().unwrap();
        assert!(step.action.is_none());
    }
}
