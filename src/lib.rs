pub mod bbox;
pub mod cache;
pub mod config;
pub mod court;
pub mod detection;
pub mod detector;
pub mod error;
pub mod filter;
pub mod frame;
pub mod hits;
pub mod kinematics;
pub mod math;
pub mod rally;
pub mod rolling_avg;
pub mod smoother;
pub mod spline;
pub mod tracker;

mod track;

pub use bbox::{BBox, Ltrb, Xywh};
pub use cache::{FileStore, HitCache, KeyValueStore, MemoryStore};
pub use config::Config;
pub use court::{CourtKeypoints, CourtMapper, CourtPositions, MiniCourt};
pub use detection::{Detection, ObjectClass};
pub use detector::{Detector, ReplayDetector};
pub use error::Error;
pub use frame::Frame;
pub use hits::{ArtifactFilter, HitDetector, HitRecord};
pub use kinematics::{IntervalOutcome, KinematicsAggregator, PlayerSpeedStat, SkipReason};
pub use rally::{MatchSummary, RallyAnalyzer, RallyReport};
pub use smoother::{SmoothedBallPosition, TrajectorySmoother};
pub use track::Track;
pub use tracker::{IdentityTracker, TrackerState};
