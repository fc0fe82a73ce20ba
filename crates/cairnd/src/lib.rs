//! cairnd — the Cairn node daemon: transport adapter, inbound dispatch,
//! sender engine, reliability supervisor, presence, and the operator
//! console. `main` wires these together; the library form exists so the
//! integration suite can run whole nodes over the in-memory bus.

pub mod console;
pub mod dispatch;
pub mod presence;
pub mod sender;
pub mod supervisor;
pub mod transport;
