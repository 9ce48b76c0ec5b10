//! Authentication and token verification

pub mod jwt;
pub mod role;

pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenValidationResult};
pub use role::Role;
