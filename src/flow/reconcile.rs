//! Payment reconciliation
//!
//! Matches a bank-reported transfer to the client's outstanding invoices.
//! Must run inside the caller's unit of work: the lookup of the unused payment
//! and the flip of its `used` flag happen under the same write lock, so two
//! attempts with the same reference cannot both settle.

use crate::db::{DbResult, InvoiceStatus, UnitOfWork};
use chrono::{Days, NaiveDate};
use rust_decimal::Decimal;

/// Description of the invoice synthesized for a client with no open debt
pub const FIRST_INVOICE_DESCRIPTION: &str = "Instalacion y Primer Mes";

const FIRST_INVOICE_DUE_DAYS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Payment consumed; `invoice_id` is the representative invoice it links to
    Settled {
        amount: Decimal,
        invoice_id: i64,
        invoices_paid: usize,
    },
    /// No unused payment carries the reference
    NotFound,
    /// Payment exists but does not cover the open debt; it stays unused
    Insufficient { amount: Decimal, debt: Decimal },
}

impl Reconciliation {
    #[allow(dead_code)] // Used in tests
    pub fn is_settled(&self) -> bool {
        matches!(self, Reconciliation::Settled { .. })
    }
}

/// Settle the client's debt with the payment identified by `reference`.
///
/// Open invoices are settled all at once, and only when the payment covers
/// their sum. The payment links to the oldest of them. A client without open
/// invoices gets a paid first invoice for the payment amount, due 30 days
/// after `today`.
pub fn reconcile_payment(
    uow: &UnitOfWork<'_>,
    client_id: i64,
    reference: &str,
    today: NaiveDate,
) -> DbResult<Reconciliation> {
    let Some(payment) = uow.find_unused_payment(reference)? else {
        tracing::info!(client_id, reference, "No unused payment for reference");
        return Ok(Reconciliation::NotFound);
    };

    let open = uow.open_invoices(client_id)?;

    let Some(oldest) = open.first() else {
        let due_date = today
            .checked_add_days(Days::new(FIRST_INVOICE_DUE_DAYS))
            .unwrap_or(today);
        let invoice = uow.insert_invoice(
            client_id,
            payment.amount,
            FIRST_INVOICE_DESCRIPTION,
            due_date,
            InvoiceStatus::Paid,
        )?;
        uow.consume_payment(payment.id, invoice.id)?;

        tracing::info!(client_id, payment_id = payment.id, invoice_id = invoice.id, "Payment settled first invoice");
        return Ok(Reconciliation::Settled {
            amount: payment.amount,
            invoice_id: invoice.id,
            invoices_paid: 1,
        });
    };

    let debt: Decimal = open.iter().map(|invoice| invoice.amount).sum();
    if payment.amount < debt {
        tracing::info!(
            client_id,
            payment_id = payment.id,
            amount = %payment.amount,
            debt = %debt,
            "Payment does not cover open debt"
        );
        return Ok(Reconciliation::Insufficient {
            amount: payment.amount,
            debt,
        });
    }

    uow.consume_payment(payment.id, oldest.id)?;
    let invoices_paid = uow.mark_open_invoices_paid(client_id)?;

    tracing::info!(client_id, payment_id = payment.id, invoices_paid, "Payment settled open invoices");
    Ok(Reconciliation::Settled {
        amount: payment.amount,
        invoice_id: oldest.id,
        invoices_paid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DbError};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn client_with_invoices(uow: &UnitOfWork<'_>, amounts: &[i64]) -> i64 {
        let client = uow.upsert_client("5000", "Ana").unwrap();
        for (i, amount) in amounts.iter().enumerate() {
            let month = u32::try_from(i).unwrap() + 1;
            uow.insert_invoice(
                client.id,
                Decimal::new(*amount, 0),
                &format!("Mes {month}"),
                date(2026, month, 5),
                InvoiceStatus::Pending,
            )
            .unwrap();
        }
        client.id
    }

    #[test]
    fn test_payment_covering_debt_settles_all_invoices() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client_id = client_with_invoices(&uow, &[10, 15, 20]);
        let payment = uow.insert_payment("REF-45", Decimal::new(45, 0)).unwrap();
        let oldest = uow.open_invoices(client_id).unwrap()[0].clone();
        assert_eq!(oldest.amount, Decimal::new(10, 0));

        let result = reconcile_payment(&uow, client_id, "REF-45", date(2026, 6, 1)).unwrap();

        assert_eq!(
            result,
            Reconciliation::Settled {
                amount: Decimal::new(45, 0),
                invoice_id: oldest.id,
                invoices_paid: 3,
            }
        );
        assert!(uow.open_invoices(client_id).unwrap().is_empty());
        let stored = uow.get_payment(payment.id).unwrap().unwrap();
        assert!(stored.used);
        assert_eq!(stored.invoice_id, Some(oldest.id));
    }

    #[test]
    fn test_insufficient_payment_changes_nothing() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client_id = client_with_invoices(&uow, &[10, 15, 20]);
        let payment = uow.insert_payment("REF-44", Decimal::new(44, 0)).unwrap();

        let result = reconcile_payment(&uow, client_id, "REF-44", date(2026, 6, 1)).unwrap();

        assert_eq!(
            result,
            Reconciliation::Insufficient {
                amount: Decimal::new(44, 0),
                debt: Decimal::new(45, 0),
            }
        );
        assert_eq!(uow.open_invoices(client_id).unwrap().len(), 3);
        assert!(!uow.get_payment(payment.id).unwrap().unwrap().used);
    }

    #[test]
    fn test_no_open_invoices_synthesizes_first_invoice() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client_id = client_with_invoices(&uow, &[]);
        uow.insert_payment("REF-30", Decimal::new(3000, 2)).unwrap();

        let result = reconcile_payment(&uow, client_id, "REF-30", date(2026, 1, 15)).unwrap();
        assert!(result.is_settled());

        let invoices = uow.invoices(client_id).unwrap();
        assert_eq!(invoices.len(), 1);
        assert_eq!(invoices[0].description, FIRST_INVOICE_DESCRIPTION);
        assert_eq!(invoices[0].amount, Decimal::new(3000, 2));
        assert_eq!(invoices[0].status, InvoiceStatus::Paid);
        assert_eq!(invoices[0].due_date, date(2026, 2, 14));
    }

    #[test]
    fn test_unknown_and_used_references_are_not_found() {
        let db = Database::open_in_memory().unwrap();
        let uow = db.begin().unwrap();
        let client_id = client_with_invoices(&uow, &[10]);
        uow.insert_payment("REF-10", Decimal::new(10, 0)).unwrap();

        assert_eq!(
            reconcile_payment(&uow, client_id, "REF-XX", date(2026, 6, 1)).unwrap(),
            Reconciliation::NotFound
        );
        assert!(reconcile_payment(&uow, client_id, "REF-10", date(2026, 6, 1))
            .unwrap()
            .is_settled());
        assert_eq!(
            reconcile_payment(&uow, client_id, "REF-10", date(2026, 6, 1)).unwrap(),
            Reconciliation::NotFound
        );
    }

    #[test]
    fn test_concurrent_reconciliation_settles_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("support.db");

        let setup = Database::open(&path).unwrap();
        let client_id = setup
            .transaction(|uow| {
                let client = uow.upsert_client("6000", "Beto")?;
                uow.insert_payment("REF-RACE", Decimal::new(50, 0))?;
                Ok::<_, DbError>(client.id)
            })
            .unwrap();

        // Separate connections, so only SQLite's write lock serializes them
        let settled: Vec<bool> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let path = path.clone();
                    scope.spawn(move || {
                        let db = Database::open(&path).unwrap();
                        db.transaction(|uow| reconcile_payment(uow, client_id, "REF-RACE", date(2026, 6, 1)))
                            .unwrap()
                            .is_settled()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(settled.iter().filter(|s| **s).count(), 1);
        let uow = setup.begin().unwrap();
        assert_eq!(uow.invoices(client_id).unwrap().len(), 1);
    }
}
