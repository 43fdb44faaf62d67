//! The aggregation view: a BigQuery table function which sums billing export
//! line items by project and service for a single partition date.
use crate::{warehouse::Warehouse, Config};
use anyhow::Context;

/// Quoted, fully-qualified reference to the aggregation table function.
pub fn view_ref(config: &Config) -> String {
    format!(
        "`{}.{}.{}`",
        config.project_id, config.dataset_id, config.view_name
    )
}

/// Quoted, fully-qualified reference to the raw billing export table.
/// Billing export names its table after the account id, with dashes replaced.
pub fn source_ref(config: &Config) -> String {
    format!(
        "`{}.{}.gcp_billing_export_v1_{}`",
        config.project_id,
        config.dataset_id,
        config.billing_account_id.replace('-', "_")
    )
}

/// DDL which creates or replaces the aggregation table function.
/// Its single parameter is a `YYYY-MM-DD` partition date.
pub fn definition_sql(config: &Config) -> String {
    format!(
        r#"CREATE OR REPLACE TABLE FUNCTION {view}(part_date STRING)
AS (
  SELECT project.id AS proj, service.description AS service_name, SUM(cost) AS cost
  FROM {source}
  WHERE CAST(DATE(_PARTITIONTIME) AS STRING) = part_date
  GROUP BY project.id, service.description
)"#,
        view = view_ref(config),
        source = source_ref(config),
    )
}

/// Defines the aggregation view. Applying it again replaces the prior
/// definition with an equivalent one.
#[tracing::instrument(skip_all, fields(view = %view_ref(config)))]
pub async fn define<W: Warehouse>(warehouse: &W, config: &Config) -> anyhow::Result<()> {
    let sql = definition_sql(config);
    warehouse
        .execute(&sql)
        .await
        .context("executing aggregation view DDL")?;

    tracing::info!("defined aggregation view");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aggregation_view_ddl() {
        let sql = definition_sql(&crate::config::fixture());
        insta::assert_snapshot!("aggregation_view_ddl", sql);
    }

    #[test]
    fn references_are_fully_qualified() {
        let config = crate::config::fixture();
        assert_eq!(view_ref(&config), "`acme-billing.billing_export.daily_cost`");
        assert_eq!(
            source_ref(&config),
            "`acme-billing.billing_export.gcp_billing_export_v1_0A1B2C_3D4E5F_6A7B8C`"
        );
    }
}
