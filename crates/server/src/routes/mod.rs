pub mod auth;
pub mod checkout;
pub mod comments;
pub mod listings;
pub mod media;
pub mod ratings;

#[cfg(test)]
mod tests;
