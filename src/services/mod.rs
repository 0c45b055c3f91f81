//! 外部数据源适配器
//!
//! 每个适配器在构造时显式接收凭据与 demo 开关；demo 模式返回与实时 API 同形的示例数据。

pub mod images;
pub mod places;
pub mod traits;
pub mod weather;

pub use images::ImageService;
pub use places::{demo_catalogue, PlacesService};
pub use traits::{ImageQuery, ImageSource, VenueQuery, VenueSource, WeatherQuery, WeatherSource};
pub use weather::{weather_suggestion, WeatherService};
