use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument};

use crate::entities::shipping_rate;
use crate::errors::ServiceError;

/// Shipping cost lookup from a fixed origin city.
#[derive(Debug, Clone)]
pub struct ShippingService {
    origin_city: String,
    fallback_cost: Decimal,
}

impl ShippingService {
    pub fn new(origin_city: impl Into<String>, fallback_cost: Decimal) -> Self {
        Self {
            origin_city: origin_city.into(),
            fallback_cost,
        }
    }

    pub fn origin_city(&self) -> &str {
        &self.origin_city
    }

    /// Cost to ship to `destination_city`, matched case-insensitively.
    /// Falls back to the configured flat cost when no rate row matches.
    #[instrument(skip(self, conn))]
    pub async fn cost<C: ConnectionTrait>(
        &self,
        conn: &C,
        destination_city: &str,
    ) -> Result<Decimal, ServiceError> {
        let destination = destination_city.trim().to_lowercase();
        if destination.is_empty() {
            return Ok(self.fallback_cost);
        }

        let rate = shipping_rate::Entity::find()
            .filter(
                Expr::expr(Func::lower(Expr::col(shipping_rate::Column::OriginCity)))
                    .eq(self.origin_city.trim().to_lowercase()),
            )
            .filter(
                Expr::expr(Func::lower(Expr::col(shipping_rate::Column::DestinationCity)))
                    .eq(destination),
            )
            .one(conn)
            .await
            .map_err(ServiceError::db_error)?;

        match rate {
            Some(rate) => Ok(rate.cost),
            None => {
                debug!("no shipping rate matched; using fallback cost");
                Ok(self.fallback_cost)
            }
        }
    }
}
