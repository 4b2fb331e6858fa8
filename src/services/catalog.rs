//! Catalog management service

use crate::{
    error::AppResult,
    models::book::{Availability, Book, CreateBook, UpdateBook},
    repository::Repository,
    services::lending::LendingService,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
    lending: LendingService,
}

impl CatalogService {
    pub fn new(repository: Repository, lending: LendingService) -> Self {
        Self { repository, lending }
    }

    pub async fn list_books(&self) -> AppResult<Vec<Book>> {
        self.repository.books.list().await
    }

    pub async fn get_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.get_by_id(id).await
    }

    /// Create a new book; every copy starts available
    pub async fn create_book(&self, book: CreateBook) -> AppResult<Book> {
        let created = self.repository.books.create(&book).await?;
        tracing::info!(book_id = created.id, copies = created.total_copies, "Book created");
        Ok(created)
    }

    /// Update a book's details and copy count in one lending transaction,
    /// under the book row lock so that copies on loan are accounted for.
    pub async fn update_book(&self, id: i32, book: UpdateBook) -> AppResult<Book> {
        Ok(self
            .lending
            .update_book(id, &book.details(), book.total_copies)
            .await?)
    }

    pub async fn delete_book(&self, id: i32) -> AppResult<Book> {
        self.repository.books.delete(id).await
    }

    /// Point-in-time availability, without taking the row lock
    pub async fn availability(&self, id: i32) -> AppResult<Availability> {
        let available_copies = self.lending.availability(id).await?;
        Ok(Availability {
            book_id: id,
            available_copies,
        })
    }
}
