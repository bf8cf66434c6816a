pub mod command;
pub mod resolver;
pub mod store;
pub mod validation;

pub use command::GitService;
pub use store::RepositoryStore;
