//! berth cluster state database.
//!
//! Holds the rows the scheduler reconciles against: desired containers,
//! machines, placement rules, built images and leadership. Access goes
//! through table-scoped transactions:
//!
//! ```ignore
//! db.txn(&[Table::Container, Table::Minion]).run(|view| {
//!     let workers = view.select::<Minion, _>(|m| m.role == Role::Worker)?;
//!     // ...
//!     Ok::<_, DbError>(())
//! })?;
//! ```

mod database;
mod error;
mod model;
mod table;

pub use database::{Database, Trigger, Txn, View};
pub use error::DbError;
pub use model::{
    Container, ContainerValue, Image, ImageStatus, Leadership, Minion, Placement, Role,
    VolumeMount,
};
pub use table::{AnyRow, Row, RowId, Table};
