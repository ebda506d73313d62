pub mod inventory;
pub mod product;

pub use inventory::{InventoryCache, InventoryConfig};
pub use product::TrackedProduct;
