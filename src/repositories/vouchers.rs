use crate::models::vouchers::Voucher;

use super::StoreResult;

use sqlx::PgPool;

#[derive(Clone)]
pub struct VoucherRepository {
    conn: PgPool,
}

impl VoucherRepository {
    pub fn new(conn: PgPool) -> Self {
        VoucherRepository { conn }
    }

    pub async fn insert_voucher(&self, voucher: &Voucher) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
                INSERT INTO vouchers (code, days, created_at, is_used)
                VALUES ($1, $2, $3, FALSE)
                ON CONFLICT (code) DO NOTHING
            "#,
        )
        .bind(&voucher.code)
        .bind(voucher.days)
        .bind(voucher.created_at)
        .execute(&self.conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn get_voucher(&self, code: &str) -> StoreResult<Option<Voucher>> {
        let voucher = sqlx::query_as::<_, Voucher>(
            "SELECT code, days, created_at, is_used FROM vouchers WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(voucher)
    }

    pub async fn redeem_voucher(&self, code: &str) -> StoreResult<Option<u32>> {
        // Single conditional update: concurrent redemptions serialize on the row
        // and only one of them observes is_used = FALSE.
        let days: Option<i32> = sqlx::query_scalar(
            r#"
                UPDATE vouchers SET is_used = TRUE, used_at = CURRENT_TIMESTAMP
                WHERE code = $1 AND is_used = FALSE
                RETURNING days
            "#,
        )
        .bind(code)
        .fetch_optional(&self.conn)
        .await?;

        Ok(days.map(|days| u32::try_from(days).unwrap_or(0)))
    }

    pub async fn revoke_voucher(&self, code: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE vouchers SET is_used = TRUE, used_at = CURRENT_TIMESTAMP WHERE code = $1 AND is_used = FALSE",
        )
        .bind(code)
        .execute(&self.conn)
        .await?;

        Ok(())
    }
}
