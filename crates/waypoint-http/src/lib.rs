//! A pooled HTTP client per cluster service (query, analytics, search,
//! views, management, eventing), plus row-by-row streaming of the large JSON
//! array responses those services return.

mod error;
mod pool;
mod rows;

pub use error::Error;
pub use pool::{HttpRequest, HttpResponse, Pool, Service};
pub use rows::RowReader;
