use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::OccupancyService;
use crate::model::SpaceStatus;
use crate::observability::{OCCUPANCY_PERCENT, SESSIONS_ACTIVE, SPACES};
use crate::report::Occupancy;

const STATUSES: [SpaceStatus; 4] = [
    SpaceStatus::Available,
    SpaceStatus::Occupied,
    SpaceStatus::Reserved,
    SpaceStatus::OutOfService,
];

/// Push the current occupancy into the gauges.
pub fn publish_gauges(service: &OccupancyService) -> Occupancy {
    let occupancy = service.occupancy();
    for status in STATUSES {
        let count = match status {
            SpaceStatus::Available => occupancy.available,
            SpaceStatus::Occupied => occupancy.occupied,
            SpaceStatus::Reserved => occupancy.reserved,
            SpaceStatus::OutOfService => occupancy.out_of_service,
        };
        metrics::gauge!(SPACES, "status" => status.as_str()).set(count as f64);
    }
    metrics::gauge!(SESSIONS_ACTIVE).set(service.active_count() as f64);
    metrics::gauge!(OCCUPANCY_PERCENT).set(occupancy.ratio * 100.0);
    occupancy
}

/// Background task: refresh gauges every `every` and compact the journal
/// once more than `compact_threshold` events were appended since the last
/// compaction.
pub async fn run_publisher(service: Arc<OccupancyService>, every: Duration, compact_threshold: u64) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let occupancy = publish_gauges(&service);
        debug!(
            "occupancy {}/{} ({}%)",
            occupancy.occupied, occupancy.denominator, occupancy.percent
        );

        let appended = service.journal_appends_since_compact().await;
        if appended > compact_threshold {
            match service.compact_journal().await {
                Ok(()) => info!("compacted journal after {appended} appends"),
                Err(e) => warn!("journal compaction failed: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use crate::engine::{CheckInRequest, EngineConfig};
    use crate::model::{ParkingSpace, VehicleCategory};
    use crate::notify::NotifyHub;

    fn test_journal_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_publisher");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn gauges_follow_occupancy() {
        let service = OccupancyService::new(
            Arc::new(InMemoryDirectory::default()),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            Arc::new(NotifyHub::new()),
            EngineConfig::default(),
        );
        for code in ["A-01", "A-02"] {
            service
                .add_space(ParkingSpace::new(code, VehicleCategory::Car))
                .await
                .unwrap();
        }
        service
            .check_in(CheckInRequest::new("ABC123", VehicleCategory::Car, 5000))
            .await
            .unwrap();

        let occupancy = publish_gauges(&service);
        assert_eq!(occupancy.occupied, 1);
        assert_eq!(occupancy.percent, 50);
    }

    #[tokio::test]
    async fn publisher_compacts_past_threshold() {
        let path = test_journal_path("publisher_compact.wal");
        let service = Arc::new(
            OccupancyService::open(
                path.clone(),
                Arc::new(InMemoryDirectory::default()),
                Arc::new(ManualClock::new(1_700_000_000_000)),
                Arc::new(NotifyHub::new()),
                EngineConfig::default(),
            )
            .unwrap(),
        );
        for i in 0..5 {
            service
                .add_space(ParkingSpace::new(format!("A-0{i}"), VehicleCategory::Car))
                .await
                .unwrap();
        }
        assert_eq!(service.journal_appends_since_compact().await, 5);

        let task = tokio::spawn(run_publisher(service.clone(), Duration::from_millis(10), 3));
        tokio::time::sleep(Duration::from_millis(100)).await;
        task.abort();

        assert_eq!(service.journal_appends_since_compact().await, 0);
        let _ = std::fs::remove_file(&path);
    }
}
