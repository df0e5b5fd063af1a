mod traits;

// Backends
mod graph_api;
mod graphql;

pub use graph_api::{parse_graph_api_page, GraphApiCredentials, GraphApiPuller};
pub use graphql::{parse_graphql_page, GraphQlPuller};
pub use traits::{Backend, PageResult, PagePuller};
