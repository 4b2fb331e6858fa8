//! Concurrent borrow/return races against the in-memory ledger

use std::sync::Arc;

use library_lending::{
    ledger::MemoryLedger,
    models::LoanStatus,
    services::lending::LendingService,
    LendingError,
};
use tokio::sync::Barrier;

fn service_with(ledger: &MemoryLedger) -> LendingService<MemoryLedger> {
    LendingService::new(ledger.clone(), None)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_borrowers_one_copy() {
    let ledger = MemoryLedger::new();
    ledger.add_member(1);
    ledger.add_member(2);
    ledger.add_book(10, 1);
    let service = service_with(&ledger);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = [1, 2]
        .into_iter()
        .map(|member_id| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.borrow(member_id, 10).await
            })
        })
        .collect();

    let mut granted = 0;
    let mut exhausted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(loan) => {
                assert_eq!(loan.book_id, 10);
                assert_eq!(loan.status, LoanStatus::Borrowed);
                granted += 1;
            }
            Err(LendingError::InventoryExhausted { book_id }) => {
                assert_eq!(book_id, 10);
                exhausted += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(exhausted, 1);
    assert_eq!(service.availability(10).await.unwrap(), 0);
    assert_eq!(ledger.loans_for_book(10).len(), 1);
    assert!(ledger.invariant_violations().is_empty());
    assert_eq!(ledger.tracked_row_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_double_return_race() {
    let ledger = MemoryLedger::new();
    ledger.add_member(1);
    ledger.add_book(20, 2);
    let service = service_with(&ledger);

    let loan = service.borrow(1, 20).await.unwrap();
    assert_eq!(service.availability(20).await.unwrap(), 1);

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
                assert!(returned.return_date.is_some());
                closed += 1;
            }
            Err(LendingError::AlreadyReturned { loan_id }) => {
                assert_eq!(loan_id, loan.id);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(closed, 1);
    assert_eq!(rejected, 1);
    assert_eq!(service.availability(20).await.unwrap(), 2);
    assert!(ledger.invariant_violations().is_empty());
    assert_eq!(ledger.tracked_row_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_many_borrowers_never_oversubscribe() {
    const COPIES: i32 = 5;
    const BORROWERS: i32 = 40;

    let ledger = MemoryLedger::new();
    for member_id in 1..=BORROWERS {
        ledger.add_member(member_id);
    }
    ledger.add_book(30, COPIES);
    let service = service_with(&ledger);

    let barrier = Arc::new(Barrier::new(BORROWERS as usize));
    let handles: Vec<_> = (1..=BORROWERS)
        .map(|member_id| {
            let service = service.clone();
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                service.borrow(member_id, 30).await
            })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(LendingError::InventoryExhausted { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(granted, COPIES);
    assert_eq!(service.availability(30).await.unwrap(), 0);
    assert!(ledger.invariant_violations().is_empty());
    assert_eq!(ledger.tracked_row_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_mixed_borrow_return_churn_keeps_counters_consistent() {
    const COPIES: i32 = 3;
    const WORKERS: i32 = 12;
    const ROUNDS: usize = 10;

    let ledger = MemoryLedger::new();
    for member_id in 1..=WORKERS {
        ledger.add_member(member_id);
    }
    ledger.add_book(40, COPIES);
    let service = service_with(&ledger);

    let handles: Vec<_> = (1..=WORKERS)
        .map(|member_id| {
            let service = service.clone();
            tokio::spawn(async move {
                let mut completed = 0;
                for _ in 0..ROUNDS {
                    match service.borrow(member_id, 40).await {
                        Ok(loan) => {
                            tokio::task::yield_now().await;
                            service.return_loan(loan.id).await.unwrap();
                            completed += 1;
                        }
                        Err(LendingError::InventoryExhausted { .. }) => {
                            tokio::task::yield_now().await;
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                completed
            })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        completed += handle.await.unwrap();
    }

    let loans = ledger.loans_for_book(40);
    assert_eq!(loans.len(), completed);
    assert!(loans.iter().all(|l| l.status == LoanStatus::Returned));
    assert_eq!(service.availability(40).await.unwrap(), COPIES);
    assert!(ledger.invariant_violations().is_empty());
    assert_eq!(ledger.tracked_row_locks(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_resize_during_borrows_preserves_on_loan() {
    let ledger = MemoryLedger::new();
    for member_id in 1..=6 {
        ledger.add_member(member_id);
    }
    ledger.add_book(50, 4);
    let service = service_with(&ledger);

    let borrowers: Vec<_> = (1..=6)
        .map(|member_id| {
            let service = service.clone();
            tokio::spawn(async move { service.borrow(member_id, 50).await })
        })
        .collect();
    let resize = {
        let service = service.clone();
        tokio::spawn(async move { service.set_total_copies(50, 8).await })
    };

    for handle in borrowers {
        match handle.await.unwrap() {
            Ok(_) | Err(LendingError::InventoryExhausted { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    resize.await.unwrap().unwrap();

    let counts = ledger.copy_counts(50).unwrap();
    assert_eq!(counts.total_copies, 8);
    let borrowed = ledger
        .loans_for_book(50)
        .iter()
        .filter(|l| l.is_active())
        .count() as i32;
    assert_eq!(counts.on_loan(), borrowed);
    assert!(ledger.invariant_violations().is_empty());
    assert_eq!(ledger.tracked_row_locks(), 0);
}
