//! CLI command implementations

pub mod config;
pub mod entry;
pub mod identity;
pub mod lock;
pub mod share;
pub mod sync;
pub(crate) mod unlock;
pub mod vault;

pub use config::execute as config;
pub use entry::execute as entry;
pub use identity::execute as identity;
pub use lock::execute as lock;
pub use share::execute as share;
pub use sync::execute as sync;
pub use vault::execute as vault;
