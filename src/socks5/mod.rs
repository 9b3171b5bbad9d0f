mod auth;
mod greeting;
mod req;

pub use auth::{AuthReply, UserPassRequest};
pub use greeting::{ClientGreeting, MethodSelection};
pub use req::{Command, ConnReply, ConnRequest, ConnStatusCode};

pub type Auth = u8;

pub const SOCKS_VERSION: u8 = 0x05;
pub const AUTH_VERSION: u8 = 0x01;

pub const AUTH_NO_PASSWORD: Auth = 0x00;
pub const AUTH_USERNAME_PASSWORD: Auth = 0x02;
pub const AUTH_NOT_ACCEPTED: Auth = 0xFF;
