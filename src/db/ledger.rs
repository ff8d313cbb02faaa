//! Ledger accessor: invoices, bank payments and support tickets

use super::{parse_date, parse_datetime, parse_decimal, DbError, DbResult, UnitOfWork};
use super::{Invoice, InvoiceStatus, Payment, Ticket, TicketPriority};
use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension};
use rust_decimal::Decimal;

impl UnitOfWork<'_> {
    // ==================== Invoice Operations ====================

    /// Pending and overdue invoices, oldest due date first.
    ///
    /// Ties on due date fall back to insertion order so the list is stable
    /// across runs.
    pub fn open_invoices(&self, client_id: i64) -> DbResult<Vec<Invoice>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client_id, amount, description, due_date, status
             FROM invoices
             WHERE client_id = ?1 AND status IN ('pending', 'overdue')
             ORDER BY due_date ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![client_id], parse_invoice_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Every invoice of the client, by id
    #[allow(dead_code)] // Used in tests
    pub fn invoices(&self, client_id: i64) -> DbResult<Vec<Invoice>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client_id, amount, description, due_date, status
             FROM invoices WHERE client_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![client_id], parse_invoice_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn insert_invoice(
        &self,
        client_id: i64,
        amount: Decimal,
        description: &str,
        due_date: NaiveDate,
        status: InvoiceStatus,
    ) -> DbResult<Invoice> {
        self.conn().execute(
            "INSERT INTO invoices (client_id, amount, description, due_date, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                client_id,
                amount.to_string(),
                description,
                due_date.format("%Y-%m-%d").to_string(),
                status.as_str()
            ],
        )?;

        Ok(Invoice {
            id: self.conn().last_insert_rowid(),
            client_id,
            amount,
            description: description.to_string(),
            due_date,
            status,
        })
    }

    /// Mark every pending/overdue invoice of the client as paid
    pub fn mark_open_invoices_paid(&self, client_id: i64) -> DbResult<usize> {
        Ok(self.conn().execute(
            "UPDATE invoices SET status = 'paid' WHERE client_id = ?1 AND status IN ('pending', 'overdue')",
            params![client_id],
        )?)
    }

    // ==================== Payment Operations ====================

    /// Record a bank-reported transfer
    #[allow(dead_code)] // Bank feed import and tests
    pub fn insert_payment(&self, reference: &str, amount: Decimal) -> DbResult<Payment> {
        self.conn().execute(
            "INSERT INTO payments (reference, amount, used, invoice_id, created_at)
             VALUES (?1, ?2, 0, NULL, ?3)",
            params![reference, amount.to_string(), Utc::now().to_rfc3339()],
        )?;

        Ok(Payment {
            id: self.conn().last_insert_rowid(),
            reference: reference.to_string(),
            amount,
            used: false,
            invoice_id: None,
        })
    }

    /// First unused payment carrying `reference`
    pub fn find_unused_payment(&self, reference: &str) -> DbResult<Option<Payment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, reference, amount, used, invoice_id
             FROM payments WHERE reference = ?1 AND used = 0
             ORDER BY id ASC LIMIT 1",
        )?;
        Ok(stmt.query_row(params![reference], parse_payment_row).optional()?)
    }

    #[allow(dead_code)] // Used in tests
    pub fn get_payment(&self, id: i64) -> DbResult<Option<Payment>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, reference, amount, used, invoice_id FROM payments WHERE id = ?1",
        )?;
        Ok(stmt.query_row(params![id], parse_payment_row).optional()?)
    }

    /// Flip `used` and link the settled invoice. The `used = 0` guard makes
    /// the flip happen at most once; a second attempt is an error so the
    /// surrounding unit of work rolls back.
    pub fn consume_payment(&self, payment_id: i64, invoice_id: i64) -> DbResult<()> {
        let updated = self.conn().execute(
            "UPDATE payments SET used = 1, invoice_id = ?1 WHERE id = ?2 AND used = 0",
            params![invoice_id, payment_id],
        )?;
        if updated == 0 {
            return Err(DbError::PaymentAlreadyUsed(payment_id));
        }
        Ok(())
    }

    // ==================== Ticket Operations ====================

    pub fn create_ticket(
        &self,
        client_id: i64,
        description: &str,
        priority: TicketPriority,
    ) -> DbResult<Ticket> {
        let now = Utc::now();
        self.conn().execute(
            "INSERT INTO tickets (client_id, description, priority, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![client_id, description, priority.as_str(), now.to_rfc3339()],
        )?;

        Ok(Ticket {
            id: self.conn().last_insert_rowid(),
            client_id,
            description: description.to_string(),
            priority,
            created_at: now,
        })
    }

    #[allow(dead_code)] // Used in tests
    pub fn tickets(&self, client_id: i64) -> DbResult<Vec<Ticket>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, client_id, description, priority, created_at
             FROM tickets WHERE client_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![client_id], |row| {
            Ok(Ticket {
                id: row.get(0)?,
                client_id: row.get(1)?,
                description: row.get(2)?,
                priority: TicketPriority::parse(&row.get::<_, String>(3)?),
                created_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }
}

fn parse_invoice_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    Ok(Invoice {
        id: row.get(0)?,
        client_id: row.get(1)?,
        amount: parse_decimal(row, 2)?,
        description: row.get(3)?,
        due_date: parse_date(row, 4)?,
        status: InvoiceStatus::parse(&row.get::<_, String>(5)?),
    })
}

fn parse_payment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        reference: row.get(1)?,
        amount: parse_decimal(row, 2)?,
        used: row.get(3)?,
        invoice_id: row.get(4)?,
    })
}
