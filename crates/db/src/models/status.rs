//! Mapping between [`JobStatus`] and the SMALLINT ids of the `job_statuses`
//! lookup table. Ids match the seed data in the initial migration.

use melodia_core::job::JobStatus;

/// Status ID type matching SMALLINT in the database.
pub type StatusId = i16;

pub const PENDING: StatusId = 1;
pub const RUNNING: StatusId = 2;
pub const SUCCEEDED: StatusId = 3;
pub const FAILED: StatusId = 4;
pub const CANCELLED: StatusId = 5;

/// Return the database status ID.
pub fn status_id(status: JobStatus) -> StatusId {
    match status {
        JobStatus::Pending => PENDING,
        JobStatus::Running => RUNNING,
        JobStatus::Succeeded => SUCCEEDED,
        JobStatus::Failed => FAILED,
        JobStatus::Cancelled => CANCELLED,
    }
}

/// Parse a database status ID. `None` for ids outside the seed data.
pub fn status_from_id(id: StatusId) -> Option<JobStatus> {
    match id {
        PENDING => Some(JobStatus::Pending),
        RUNNING => Some(JobStatus::Running),
        SUCCEEDED => Some(JobStatus::Succeeded),
        FAILED => Some(JobStatus::Failed),
        CANCELLED => Some(JobStatus::Cancelled),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_ids_match_seed_data() {
        assert_eq!(status_id(JobStatus::Pending), 1);
        assert_eq!(status_id(JobStatus::Running), 2);
        assert_eq!(status_id(JobStatus::Succeeded), 3);
        assert_eq!(status_id(JobStatus::Failed), 4);
        assert_eq!(status_id(JobStatus::Cancelled), 5);
    }

    #[test]
    fn ids_round_trip() {
        for id in 1..=5 {
            assert_eq!(status_id(status_from_id(id).unwrap()), id);
        }
        assert!(status_from_id(0).is_none());
        assert!(status_from_id(6).is_none());
    }
}
