// PostgreSQL status applier for offence notice records

use chrono::Utc;
use common::errors::ApplyError;
use common::models::ExceptionRecord;
use common::reconcile::{ApplyOutcome, StatusApplier, ValidatedRecord};
use common::store::DbPool;
use async_trait::async_trait;
use tracing::instrument;

/// Writes agency response fields onto offence notice records, matching
/// on UIN and agency reference number.
pub struct PgStatusApplier {
    pool: DbPool,
}

impl PgStatusApplier {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusApplier for PgStatusApplier {
    #[instrument(skip(self, record), fields(uin = %record.record.uin))]
    async fn apply(&self, record: &ValidatedRecord) -> Result<ApplyOutcome, ApplyError> {
        let r = &record.record;
        let validation_errors = if record.reasons.is_empty() {
            None
        } else {
            Some(record.reasons.join("; "))
        };

        let result = sqlx::query(
            r#"
            UPDATE offence_notices
            SET owner_name = $3,
                owner_date_of_birth = NULLIF($4, ''),
                address_type = NULLIF($5, ''),
                block_house_no = $6,
                street_name = $7,
                floor_no = $8,
                unit_no = $9,
                building_name = $10,
                postal_code = $11,
                date_of_death = NULLIF($12, ''),
                life_status = NULLIF($13, ''),
                invalid_address_tag = NULLIF($14, ''),
                date_address_change = NULLIF($15, ''),
                flag_ts_nro = $16,
                ts_nro_reason = $17,
                validation_errors = $18,
                response_file_name = $19,
                updated_at = $20
            WHERE uin = $1 AND ura_reference_no = $2
            "#,
        )
        .bind(&r.uin)
        .bind(&r.ura_reference_no)
        .bind(&r.name)
        .bind(&r.date_of_birth)
        .bind(&r.address_type)
        .bind(&r.block_house_no)
        .bind(&r.street_name)
        .bind(&r.floor_no)
        .bind(&r.unit_no)
        .bind(&r.building_name)
        .bind(&r.postal_code)
        .bind(&r.date_of_death)
        .bind(&r.life_status)
        .bind(&r.invalid_address_tag)
        .bind(&r.date_address_change)
        .bind(record.flag.is_some())
        .bind(record.flag)
        .bind(validation_errors)
        .bind(&record.file_name)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(ApplyOutcome::NoMatch);
        }

        tracing::debug!(
            uin = %r.uin,
            ura_reference_no = %r.ura_reference_no,
            flagged = record.flag.is_some(),
            "Notice updated from agency record"
        );
        Ok(ApplyOutcome::Updated)
    }

    #[instrument(skip(self, exception), fields(id_number = %exception.id_number))]
    async fn apply_exception(
        &self,
        exception: &ExceptionRecord,
    ) -> Result<ApplyOutcome, ApplyError> {
        let result = sqlx::query(
            r#"
            UPDATE offence_notices
            SET flag_ts_nro = TRUE,
                ts_nro_reason = $2,
                updated_at = $3
            WHERE uin = $1
            "#,
        )
        .bind(&exception.id_number)
        .bind(&exception.exception_status)
        .bind(Utc::now())
        .execute(self.pool.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Ok(ApplyOutcome::NoMatch);
        }
        Ok(ApplyOutcome::Updated)
    }
}
