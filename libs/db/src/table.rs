//! Table identifiers and the row trait.

use serde::{Deserialize, Serialize};

use crate::model::{Container, Image, Leadership, Minion, Placement};

/// Row identity, unique across all tables.
pub type RowId = u64;

/// A table in the database.
///
/// The declaration order is the global lock order: transactions always lock
/// their tables in this order, which rules out lock-order deadlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    Container,
    Minion,
    Placement,
    Image,
    Leadership,
}

impl Table {
    /// Every table, in lock order.
    pub const ALL: [Table; 5] = [
        Table::Container,
        Table::Minion,
        Table::Placement,
        Table::Image,
        Table::Leadership,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Table::Container => "container",
            Table::Minion => "minion",
            Table::Placement => "placement",
            Table::Image => "image",
            Table::Leadership => "leadership",
        };
        f.write_str(name)
    }
}

/// Storage form of a row.
#[derive(Debug, Clone, PartialEq)]
pub enum AnyRow {
    Container(Container),
    Minion(Minion),
    Placement(Placement),
    Image(Image),
    Leadership(Leadership),
}

/// A type stored in one table.
pub trait Row: Clone + PartialEq + Default + Send + 'static {
    /// The table holding rows of this type.
    const TABLE: Table;

    fn id(&self) -> RowId;

    fn set_id(&mut self, id: RowId);

    fn into_any(self) -> AnyRow;

    fn from_any(row: &AnyRow) -> Option<&Self>;
}

macro_rules! impl_row {
    ($ty:ident) => {
        impl Row for $ty {
            const TABLE: Table = Table::$ty;

            fn id(&self) -> RowId {
                self.id
            }

            fn set_id(&mut self, id: RowId) {
                self.id = id;
            }

            fn into_any(self) -> AnyRow {
                AnyRow::$ty(self)
            }

            fn from_any(row: &AnyRow) -> Option<&Self> {
                match row {
                    AnyRow::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_row!(Container);
impl_row!(Minion);
impl_row!(Placement);
impl_row!(Image);
impl_row!(Leadership);
