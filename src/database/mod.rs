pub mod crud;
pub mod executor;
pub mod manager;
pub mod models;
pub mod page;
pub mod session;

pub use crud::{Actor, Crud, CrudError, Fetched, GetOptions, PatchValue, UpdatePatch};
pub use manager::{DatabaseError, DatabaseManager};
pub use page::Page;
pub use session::DbSession;
