// Domain layer: relay models, schedule rules and ports. No HTTP or file I/O here.

pub mod model;
pub mod ports;
pub mod schedule;
