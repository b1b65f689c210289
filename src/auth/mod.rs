//! Authentication: rotating daily access codes and alias resolution.

pub mod code;
pub mod resolve;

pub use resolve::{
    delete_user_guarded, login, upsert_user_guarded, validate_admin, validate_table,
    validate_user, LoginReply,
};
