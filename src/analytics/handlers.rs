use axum::{extract::State, Json};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use serde::Serialize;
use tracing::instrument;

use crate::{
    auth::{jwt::AdminUser, repo::USERS_COLLECTION},
    error::ApiError,
    resources::{
        defs::{ANNOUNCEMENTS, APPLICATIONS, BOOKINGS, GUIDES, PACKAGES, STORIES},
        repo::Repository,
    },
    retry::{with_backoff, READ_ATTEMPTS, READ_BASE_DELAY},
    state::AppState,
};

/// Per-collection document counts for the admin dashboard.
#[derive(Debug, Serialize)]
pub struct AnalyticsSummary {
    pub users: u64,
    pub packages: u64,
    pub bookings: u64,
    pub tour_guides: u64,
    pub stories: u64,
    pub applications: u64,
    pub announcements: u64,
}

/// One bar of the bookings-per-date chart.
#[derive(Debug, Serialize)]
pub struct ChartPoint {
    pub date: String,
    pub bookings: i64,
}

/// The users collection sits behind the credential store, not a
/// `ResourceDef`, so its count is taken directly.
async fn users_count(state: &AppState) -> Result<u64, ApiError> {
    let coll = state.db.collection::<Document>(USERS_COLLECTION);
    with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
        let coll = coll.clone();
        async move { coll.count_documents(None, None).await.map_err(ApiError::from) }
    })
    .await
}

#[instrument(skip(state))]
pub async fn summary(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<AnalyticsSummary>, ApiError> {
    let summary = AnalyticsSummary {
        users: users_count(&state).await?,
        packages: Repository::new(&state.db, &PACKAGES).count().await?,
        bookings: Repository::new(&state.db, &BOOKINGS).count().await?,
        tour_guides: Repository::new(&state.db, &GUIDES).count().await?,
        stories: Repository::new(&state.db, &STORIES).count().await?,
        applications: Repository::new(&state.db, &APPLICATIONS).count().await?,
        announcements: Repository::new(&state.db, &ANNOUNCEMENTS).count().await?,
    };
    Ok(Json(summary))
}

/// Bookings grouped by tour date, ascending, for the dashboard chart.
#[instrument(skip(state))]
pub async fn chart(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> Result<Json<Vec<ChartPoint>>, ApiError> {
    let coll = state.db.collection::<Document>(BOOKINGS.collection);
    let rows: Vec<Document> = with_backoff(READ_ATTEMPTS, READ_BASE_DELAY, move || {
        let coll = coll.clone();
        async move {
            let pipeline = vec![
                doc! { "$group": { "_id": "$tour_date", "bookings": { "$sum": 1 } } },
                doc! { "$sort": { "_id": 1 } },
            ];
            let cursor = coll.aggregate(pipeline, None).await.map_err(ApiError::from)?;
            cursor.try_collect().await.map_err(ApiError::from)
        }
    })
    .await?;

    let points = rows.iter().map(chart_point).collect();
    Ok(Json(points))
}

fn chart_point(row: &Document) -> ChartPoint {
    let date = row.get_str("_id").unwrap_or_default().to_string();
    let bookings = match row.get("bookings") {
        Some(Bson::Int32(n)) => *n as i64,
        Some(Bson::Int64(n)) => *n,
        Some(Bson::Double(n)) => *n as i64,
        _ => 0,
    };
    ChartPoint { date, bookings }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_points_read_grouped_rows() {
        let row = doc! { "_id": "2025-07-01", "bookings": 3_i32 };
        let point = chart_point(&row);
        assert_eq!(point.date, "2025-07-01");
        assert_eq!(point.bookings, 3);

        let row = doc! { "_id": "2025-07-02", "bookings": 12_i64 };
        assert_eq!(chart_point(&row).bookings, 12);

        // Rows with a non-string key (bad data) degrade instead of panicking.
        let row = doc! { "_id": Bson::Null, "bookings": 1_i32 };
        let point = chart_point(&row);
        assert_eq!(point.date, "");
        assert_eq!(point.bookings, 1);
    }

    #[test]
    fn summary_serializes_flat() {
        let summary = AnalyticsSummary {
            users: 4,
            packages: 9,
            bookings: 17,
            tour_guides: 3,
            stories: 5,
            applications: 2,
            announcements: 1,
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["bookings"], 17);
        assert_eq!(json["tour_guides"], 3);
    }
}
