mod account;
mod account_service;
mod locale;
mod person;
mod person_service;
mod provider;
mod provider_service;
mod user;
mod user_service;

#[cfg(test)]
pub mod testing;

pub use account::*;
pub use account_service::*;
pub use locale::*;
pub use person::*;
pub use person_service::*;
pub use provider::*;
pub use provider_service::*;
pub use user::*;
pub use user_service::*;
