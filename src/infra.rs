mod pg_person_service;
mod pg_provider_service;
mod pg_user_service;

pub use pg_person_service::*;
pub use pg_provider_service::*;
pub use pg_user_service::*;
