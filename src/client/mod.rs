//! Client connection layer

pub mod cluster_connection;
pub mod control_plane;
pub mod pipeline;
pub mod raw_connection;

pub use cluster_connection::ClusterConnection;
pub use control_plane::{ControlPlane, ControlPlaneExt, NodeConnector};
pub use pipeline::Pipeline;
pub use raw_connection::{ConnectionFactory, RawConnection};
