//! Remote atomic histogram benchmark.
//!
//! Every rank owns a shard of a distributed counts table and fires random
//! single-word atomic adds at arbitrary shards. The update phase is timed
//! between two barriers, then an inverse pass subtracts every update again
//! and each rank checks that its shard is back to zero.
//!
//! The core ([`codec`], [`requests`], [`engine`], [`verify`]) is written
//! against the [`runtime::PgasRuntime`] and [`table::RemoteAtomicTable`]
//! traits, so it runs unchanged on in-process threads or on lamellar PEs.

pub mod bench;
pub mod codec;
pub mod engine;
pub mod error;
pub mod options;
pub mod printer;
pub mod record;
pub mod requests;
pub mod runtime;
pub mod table;
pub mod verify;

pub use bench::{run_histo, HistoConfig, RunStatistics};
pub use codec::{AddressCodec, GlobalIndex, PackedRequest, SlotAddress};
pub use error::{HistoError, Result};
pub use requests::{RequestGenerator, RequestList, RequestPattern};
pub use runtime::{Collective, PgasRuntime};
pub use table::RemoteAtomicTable;
