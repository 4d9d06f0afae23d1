//! # Configuration
//!
//! Settings are layered, later sources winning:
//! 1. Built-in defaults
//! 2. `config/default.toml`, then `config/{RUN_ENV}.toml`
//! 3. `APP__`-prefixed environment variables (`APP__QUEUE__BATCH_SIZE=20`)
//! 4. Well-known variables such as `DATABASE_URL`, `REDIS_URL` and `JWT_SECRET`
//!
//! A `.env` file is read first via dotenvy.
//!
//! ```rust,ignore
//! use realtime_chat::config::Settings;
//!
//! let settings = Settings::load()?;
//! let addr = settings.server.socket_addr()?;
//! ```

mod settings;

pub use settings::*;
