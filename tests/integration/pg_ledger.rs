//! PostgreSQL ledger tests, run against a live database.
//!
//! Point `DATABASE_URL` at a scratch database, then run:
//! `cargo test --test pg_ledger -- --ignored`

use std::sync::Arc;
use std::time::Duration;

use library_lending::{
    error::StoreError,
    ledger::{Ledger, PgLedger},
    models::{BookDetails, LoanStatus},
    services::lending::LendingService,
    LendingError,
};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::sync::Barrier;

async fn pool() -> PgPool {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&url)
        .await
        .expect("Failed to connect to database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Unique suffix so repeated runs do not collide on unique columns
fn unique() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

async fn create_member(pool: &PgPool) -> i32 {
    sqlx::query_scalar::<_, i32>("INSERT INTO members (name, email) VALUES ($1, $2) RETURNING id")
        .bind("Ledger Test")
        .bind(format!("ledger-{}@example.org", unique()))
        .fetch_one(pool)
        .await
        .expect("Failed to insert member")
}

async fn create_book(pool: &PgPool, copies: i32) -> i32 {
    sqlx::query_scalar::<_, i32>(
        "INSERT INTO books (title, author, published_year, total_copies, available_copies) \
         VALUES ($1, 'Ledger Test', 2001, $2, $2) RETURNING id",
    )
    .bind(format!("Ledger Book {}", unique()))
    .bind(copies)
    .fetch_one(pool)
    .await
    .expect("Failed to insert book")
}

fn service(pool: &PgPool) -> LendingService<PgLedger> {
    LendingService::new(PgLedger::new(pool.clone(), Some(Duration::from_secs(5))), None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore] // Run with: cargo test -- --ignored
async fn test_two_borrowers_one_copy() {
    let pool = pool().await;
    let first = create_member(&pool).await;
    let second = create_member(&pool).await;
    let book_id = create_book(&pool, 1).await;
    let service = service(&pool);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [first, second]
        .into_iter()
        .map(|member_id| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.borrow(member_id, book_id).await
            })
        })
        .collect();

    let mut granted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(LendingError::InventoryExhausted { .. }) => exhausted += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!((granted, exhausted), (1, 1));
    assert_eq!(service.availability(book_id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_double_return_race() {
    let pool = pool().await;
    let member_id = create_member(&pool).await;
    let book_id = create_book(&pool, 1).await;
    let service = service(&pool);
    let loan = service.borrow(member_id, book_id).await.unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = (0..2)
        .map(|_| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            let loan_id = loan.id;
            tokio::spawn(async move {
                barrier.wait().await;
                service.return_loan(loan_id).await
            })
        })
        .collect();

    let mut closed = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(returned) => {
                assert_eq!(returned.status, LoanStatus::Returned);
                closed += 1;
            }
            Err(LendingError::AlreadyReturned { .. }) => rejected += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!((closed, rejected), (1, 1));
    assert_eq!(service.availability(book_id).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_unknown_member_rolls_back_decrement() {
    let pool = pool().await;
    let book_id = create_book(&pool, 1).await;
    let service = service(&pool);

    let err = service.borrow(i32::MAX, book_id).await.unwrap_err();
    assert!(matches!(err, LendingError::NotFound { entity: "Member", .. }));
    assert_eq!(service.availability(book_id).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn test_lock_wait_times_out() {
    let pool = pool().await;
    let book_id = create_book(&pool, 1).await;
    let ledger = PgLedger::new(pool.clone(), Some(Duration::from_millis(50)));

    let mut holder = ledger.begin().await.unwrap();
    ledger
        .lock_and_get_availability(&mut holder, book_id)
        .await
        .unwrap();

    let mut waiter = ledger.begin().await.unwrap();
    let err = ledger
        .lock_and_get_availability(&mut waiter, book_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LendingError::Transaction(StoreError::LockTimeout { .. })
    ));

    ledger.rollback(waiter).await.unwrap();
    ledger.rollback(holder).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_counter_range_check_is_a_constraint_error() {
    let pool = pool().await;
    let book_id = create_book(&pool, 1).await;
    let ledger = PgLedger::new(pool.clone(), None);

    let mut tx = ledger.begin().await.unwrap();
    let err = ledger.increment_available(&mut tx, book_id).await.unwrap_err();
    assert!(matches!(
        err,
        LendingError::Transaction(StoreError::Constraint(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_update_book_is_one_transaction() {
    let pool = pool().await;
    let member_id = create_member(&pool).await;
    let book_id = create_book(&pool, 2).await;
    let service = service(&pool);
    service.borrow(member_id, book_id).await.unwrap();

    let details = BookDetails {
        title: "Updated Title".to_string(),
        author: "Updated Author".to_string(),
        published_year: 2010,
    };
    let book = service.update_book(book_id, &details, 4).await.unwrap();
    assert_eq!(book.title, "Updated Title");
    assert_eq!((book.total_copies, book.available_copies), (4, 3));

    let err = service.update_book(book_id, &details, 0).await.unwrap_err();
    assert!(matches!(err, LendingError::CopyCountBelowOnLoan { on_loan: 1, .. }));
    assert_eq!(service.availability(book_id).await.unwrap(), 3);
}
