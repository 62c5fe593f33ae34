//! Persistence layer: connection pooling, startup preparation, the
//! document/chunk/log repository, and the repair service's bulk queries.

pub mod document;
pub mod init;
pub mod pool;
pub mod repair;

pub use document::DocumentRepository;
pub use pool::{
    build_control_pool, build_repair_pool, build_worker_pool, get_conn, PgPool, PgPooledConnection,
};
pub use repair::RepairRepository;
