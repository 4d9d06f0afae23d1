//! Repository Implementations
//!
//! PostgreSQL implementations of domain repository traits.
//!
//! ## Available Repositories
//!
//! - **RoomRepository** - Room lookups (privacy, direct flag)
//! - **MembershipRepository** - Room membership rows and bans
//! - **MessageRepository** - Message inserts, reply lookups, read receipts
//!
//! ## Usage Example
//!
//! ```rust,ignore
//! use sqlx::PgPool;
//! use realtime_chat::infrastructure::repositories::{
//!     PgMembershipRepository, PgMessageRepository, PgRoomRepository,
//! };
//!
//! fn setup_repositories(pool: PgPool) {
//!     let rooms = PgRoomRepository::new(pool.clone());
//!     let members = PgMembershipRepository::new(pool.clone());
//!     let messages = PgMessageRepository::new(pool);
//! }
//! ```

mod member_repository;
mod message_repository;
mod room_repository;

pub use member_repository::PgMembershipRepository;
pub use message_repository::PgMessageRepository;
pub use room_repository::PgRoomRepository;
