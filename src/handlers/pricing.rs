//! Product pricing handlers
//!
//! A pricing row stores the cost breakdown of a product together with the
//! derived totals, which are always recomputed server side.
//!
//! Material cost can also be derived from the product's bill of materials
//! valued at current raw material prices. Products without a pricing row use
//! [`DEFAULT_PROFIT_MARGIN`].

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::entity::system_audit_log::AuditAction;
use crate::entity::{product, product_formula, product_pricing, raw_material};
use crate::error::{AppError, AppResult, OptionExt};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{delete_or_404, find_or_404, Created};

const MODULE: &str = perm::COMMERCIAL;
const RESOURCE: &str = "Precificação";

/// Markup used for products without a pricing row, in percent
pub const DEFAULT_PROFIT_MARGIN: f64 = 30.0;
const NO_FORMULA: &str = "Produto não possui fórmula definida para cálculo de custo";

/// Cost inputs of a pricing calculation
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CostBreakdown {
    pub raw_material_cost: f64,
    pub labor_cost: f64,
    pub overhead_cost: f64,
    pub freight_cost: f64,
    pub taxes: f64,
    /// Markup over total cost, in percent
    pub profit_margin: f64,
}

/// Derived values of a pricing calculation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceCalculation {
    #[serde(flatten)]
    pub costs: CostBreakdown,
    pub total_cost: f64,
    pub suggested_price: f64,
    /// Share of the suggested price left after costs, in percent
    pub margin: f64,
}

impl CostBreakdown {
    fn validate(&self) -> AppResult<()> {
        let fields = [
            ("rawMaterialCost", self.raw_material_cost),
            ("laborCost", self.labor_cost),
            ("overheadCost", self.overhead_cost),
            ("freightCost", self.freight_cost),
            ("taxes", self.taxes),
            ("profitMargin", self.profit_margin),
        ];
        for (field, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(AppError::field(field, "Valor deve ser um número não negativo"));
            }
        }
        Ok(())
    }

    pub fn calculate(self) -> PriceCalculation {
        let total_cost = self.raw_material_cost
            + self.labor_cost
            + self.overhead_cost
            + self.freight_cost
            + self.taxes;
        let suggested_price = total_cost * (1.0 + self.profit_margin / 100.0);
        let margin = if suggested_price == 0.0 {
            0.0
        } else {
            (suggested_price - total_cost) / suggested_price * 100.0
        };
        PriceCalculation {
            costs: self,
            total_cost,
            suggested_price,
            margin,
        }
    }
}

impl From<&product_pricing::Model> for CostBreakdown {
    fn from(m: &product_pricing::Model) -> Self {
        Self {
            raw_material_cost: m.raw_material_cost,
            labor_cost: m.labor_cost,
            overhead_cost: m.overhead_cost,
            freight_cost: m.freight_cost,
            taxes: m.taxes,
            profit_margin: m.profit_margin,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePricing {
    pub product_id: Option<i32>,
    #[serde(flatten)]
    pub costs: CostBreakdown,
    pub calculation_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePricing {
    pub product_id: Option<i32>,
    pub raw_material_cost: Option<f64>,
    pub labor_cost: Option<f64>,
    pub overhead_cost: Option<f64>,
    pub freight_cost: Option<f64>,
    pub taxes: Option<f64>,
    pub profit_margin: Option<f64>,
    pub calculation_date: Option<NaiveDate>,
}

impl UpdatePricing {
    fn merge(&self, current: CostBreakdown) -> CostBreakdown {
        CostBreakdown {
            raw_material_cost: self.raw_material_cost.unwrap_or(current.raw_material_cost),
            labor_cost: self.labor_cost.unwrap_or(current.labor_cost),
            overhead_cost: self.overhead_cost.unwrap_or(current.overhead_cost),
            freight_cost: self.freight_cost.unwrap_or(current.freight_cost),
            taxes: self.taxes.unwrap_or(current.taxes),
            profit_margin: self.profit_margin.unwrap_or(current.profit_margin),
        }
    }
}

fn set_calculation(model: &mut product_pricing::ActiveModel, calc: &PriceCalculation) {
    model.raw_material_cost = Set(calc.costs.raw_material_cost);
    model.labor_cost = Set(calc.costs.labor_cost);
    model.overhead_cost = Set(calc.costs.overhead_cost);
    model.freight_cost = Set(calc.costs.freight_cost);
    model.taxes = Set(calc.costs.taxes);
    model.profit_margin = Set(calc.costs.profit_margin);
    model.total_cost = Set(calc.total_cost);
    model.suggested_price = Set(calc.suggested_price);
    model.margin = Set(calc.margin);
}

/// GET /api/product-pricings
pub async fn list_pricings(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<product_pricing::Model>>> {
    let rows = product_pricing::Entity::find()
        .order_by_desc(product_pricing::Column::CalculationDate)
        .order_by_desc(product_pricing::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/product-pricings/:id
pub async fn get_pricing(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<product_pricing::Model>> {
    Ok(Json(find_or_404::<product_pricing::Entity, _>(&*db, id, RESOURCE).await?))
}

/// GET /api/product-pricings/product/:productId
pub async fn list_pricings_for_product(
    Extension(db): Extension<DbConn>,
    Path(product_id): Path<i32>,
) -> AppResult<Json<Vec<product_pricing::Model>>> {
    let rows = product_pricing::Entity::find()
        .filter(product_pricing::Column::ProductId.eq(product_id))
        .order_by_desc(product_pricing::Column::CalculationDate)
        .order_by_desc(product_pricing::Column::Id)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// POST /api/product-pricings/simulate
pub async fn simulate_pricing(Json(costs): Json<CostBreakdown>) -> AppResult<Json<PriceCalculation>> {
    costs.validate()?;
    Ok(Json(costs.calculate()))
}

/// POST /api/product-pricings
pub async fn create_pricing(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<CreatePricing>,
) -> AppResult<Created<product_pricing::Model>> {
    req.costs.validate()?;
    let calc = req.costs.calculate();

    let mut model = product_pricing::ActiveModel {
        product_id: Set(req.product_id),
        calculation_date: Set(req.calculation_date.unwrap_or_else(crate::db::today)),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    };
    set_calculation(&mut model, &calc);
    let created = model.insert(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "product_pricings", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/product-pricings/:id
pub async fn update_pricing(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(req): Json<UpdatePricing>,
) -> AppResult<Json<product_pricing::Model>> {
    let current = find_or_404::<product_pricing::Entity, _>(&*db, id, RESOURCE).await?;
    let costs = req.merge(CostBreakdown::from(&current));
    costs.validate()?;
    let calc = costs.calculate();

    let mut model: product_pricing::ActiveModel = current.into();
    set_calculation(&mut model, &calc);
    if let Some(product_id) = req.product_id {
        model.product_id = Set(Some(product_id));
    }
    if let Some(date) = req.calculation_date {
        model.calculation_date = Set(date);
    }
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "product_pricings", id, None);
    Ok(Json(updated))
}

/// DELETE /api/product-pricings/:id
pub async fn delete_pricing(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<product_pricing::Entity, _>(&*db, id, RESOURCE).await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "product_pricings", id, None);
    Ok(status)
}

// ---------------------------------------------------------------------------
// Bill of materials costing
// ---------------------------------------------------------------------------

/// One formula line valued at the material's current price
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCost {
    pub material_id: i32,
    pub name: String,
    pub code: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub cost: f64,
}

/// Value each formula line for `scale` units of product. Lines pointing at a
/// material missing from `materials` are skipped.
pub fn material_costs(
    formula: &[product_formula::Model],
    materials: &[raw_material::Model],
    scale: f64,
) -> Vec<MaterialCost> {
    formula
        .iter()
        .filter_map(|line| {
            let material = materials.iter().find(|m| m.id == line.material_id)?;
            let quantity = line.quantity * scale;
            Some(MaterialCost {
                material_id: material.id,
                name: material.name.clone(),
                code: material.code.clone(),
                unit: line.unit.clone(),
                quantity,
                unit_price: material.price,
                cost: quantity * material.price,
            })
        })
        .collect()
}

pub fn total_material_cost(lines: &[MaterialCost]) -> f64 {
    lines.iter().map(|l| l.cost).sum()
}

/// Costs of a product whose raw material cost comes from its formula. The
/// other costs and the markup come from the latest pricing row when there is
/// one.
pub fn formula_breakdown(
    material_cost: f64,
    pricing: Option<&product_pricing::Model>,
) -> CostBreakdown {
    match pricing {
        Some(row) => CostBreakdown {
            raw_material_cost: material_cost,
            ..CostBreakdown::from(row)
        },
        None => CostBreakdown {
            raw_material_cost: material_cost,
            profit_margin: DEFAULT_PROFIT_MARGIN,
            ..Default::default()
        },
    }
}

/// Formula lines of a product and the materials they reference
pub async fn load_formula<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<(Vec<product_formula::Model>, Vec<raw_material::Model>), DbErr> {
    let formula = product_formula::Entity::find()
        .filter(product_formula::Column::ProductId.eq(product_id))
        .order_by_asc(product_formula::Column::Id)
        .all(db)
        .await?;
    if formula.is_empty() {
        return Ok((formula, Vec::new()));
    }
    let ids: Vec<i32> = formula.iter().map(|l| l.material_id).collect();
    let materials = raw_material::Entity::find()
        .filter(raw_material::Column::Id.is_in(ids))
        .all(db)
        .await?;
    Ok((formula, materials))
}

async fn latest_pricing<C: ConnectionTrait>(
    db: &C,
    product_id: i32,
) -> Result<Option<product_pricing::Model>, DbErr> {
    product_pricing::Entity::find()
        .filter(product_pricing::Column::ProductId.eq(product_id))
        .order_by_desc(product_pricing::Column::CalculationDate)
        .order_by_desc(product_pricing::Column::Id)
        .one(db)
        .await
}

/// Cost analysis of a product from its formula
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCost {
    pub product_id: i32,
    pub product_name: String,
    pub materials: Vec<MaterialCost>,
    #[serde(flatten)]
    pub calculation: PriceCalculation,
}

/// GET /api/product-costs/:id
pub async fn get_product_cost(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<ProductCost>> {
    let product = find_or_404::<product::Entity, _>(&*db, id, "Produto").await?;
    let (formula, materials) = load_formula(&*db, id).await?;
    let pricing = latest_pricing(&*db, id).await?;

    let lines = material_costs(&formula, &materials, 1.0);
    let calculation = formula_breakdown(total_material_cost(&lines), pricing.as_ref()).calculate();
    Ok(Json(ProductCost {
        product_id: product.id,
        product_name: product.name,
        materials: lines,
        calculation,
    }))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionSimulation {
    pub product_id: i32,
    pub quantity: f64,
    #[serde(default = "default_true")]
    pub include_labor: bool,
    #[serde(default = "default_true")]
    pub include_overhead: bool,
}

/// Cost of producing a batch. Unit values are per product unit, `materials`
/// lists batch quantities.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub product_id: i32,
    pub product_name: String,
    pub quantity: f64,
    pub material_cost: f64,
    pub labor_cost: f64,
    pub overhead_cost: f64,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub profit_margin: f64,
    pub suggested_price: f64,
    pub materials: Vec<MaterialCost>,
}

/// Batch cost of `req.quantity` units of a product
pub fn simulate_production(
    req: &ProductionSimulation,
    product: &product::Model,
    formula: &[product_formula::Model],
    materials: &[raw_material::Model],
    pricing: Option<&product_pricing::Model>,
) -> AppResult<SimulationResult> {
    if !req.quantity.is_finite() || req.quantity <= 0.0 {
        return Err(AppError::field("quantity", "Quantidade deve ser maior que zero"));
    }
    if formula.is_empty() {
        return Err(AppError::BadRequest(NO_FORMULA.to_string()));
    }

    let lines = material_costs(formula, materials, req.quantity);
    let material_cost = total_material_cost(&lines) / req.quantity;
    let costs = formula_breakdown(material_cost, pricing);
    let labor_cost = if req.include_labor { costs.labor_cost } else { 0.0 };
    let overhead_cost = if req.include_overhead { costs.overhead_cost } else { 0.0 };
    let unit_cost = material_cost + labor_cost + overhead_cost;

    Ok(SimulationResult {
        product_id: product.id,
        product_name: product.name.clone(),
        quantity: req.quantity,
        material_cost,
        labor_cost,
        overhead_cost,
        unit_cost,
        total_cost: unit_cost * req.quantity,
        profit_margin: costs.profit_margin,
        suggested_price: unit_cost * (1.0 + costs.profit_margin / 100.0),
        materials: lines,
    })
}

/// POST /api/product-costs/simulate
pub async fn simulate_production_cost(
    Extension(db): Extension<DbConn>,
    Json(req): Json<ProductionSimulation>,
) -> AppResult<Json<SimulationResult>> {
    let product = find_or_404::<product::Entity, _>(&*db, req.product_id, "Produto").await?;
    let (formula, materials) = load_formula(&*db, product.id).await?;
    let pricing = latest_pricing(&*db, product.id).await?;
    let result = simulate_production(&req, &product, &formula, &materials, pricing.as_ref())?;
    Ok(Json(result))
}

/// Product with the pricing row refreshed from its formula
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculatedPrice {
    pub product: product::Model,
    pub pricing: product_pricing::Model,
    pub materials: Vec<MaterialCost>,
}

/// Refresh the latest pricing row of a product from its formula, creating one
/// when missing, and copy total cost and suggested price onto the product
pub async fn recalculate_price(
    db: &DatabaseConnection,
    product_id: i32,
    user_id: i32,
) -> AppResult<RecalculatedPrice> {
    let txn = db.begin().await?;
    let product = product::Entity::find_by_id(product_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_not_found("Produto")?;
    let (formula, materials) = load_formula(&txn, product_id).await?;
    if formula.is_empty() {
        return Err(AppError::BadRequest(NO_FORMULA.to_string()));
    }

    let lines = material_costs(&formula, &materials, 1.0);
    let existing = latest_pricing(&txn, product_id).await?;
    let calc = formula_breakdown(total_material_cost(&lines), existing.as_ref()).calculate();

    let pricing = match existing {
        Some(row) => {
            let mut model: product_pricing::ActiveModel = row.into();
            set_calculation(&mut model, &calc);
            model.calculation_date = Set(crate::db::today());
            model.update(&txn).await?
        }
        None => {
            let mut model = product_pricing::ActiveModel {
                product_id: Set(Some(product_id)),
                calculation_date: Set(crate::db::today()),
                created_at: Set(crate::db::now()),
                created_by: Set(Some(user_id)),
                ..Default::default()
            };
            set_calculation(&mut model, &calc);
            model.insert(&txn).await?
        }
    };

    let mut model: product::ActiveModel = product.into();
    model.unit_cost = Set(calc.total_cost);
    model.selling_price = Set(Some(calc.suggested_price));
    let product = model.update(&txn).await?;
    txn.commit().await?;

    Ok(RecalculatedPrice {
        product,
        pricing,
        materials: lines,
    })
}

/// POST /api/products/:id/recalculate-price
pub async fn recalculate_product_price(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<Json<RecalculatedPrice>> {
    let result = recalculate_price(&db, id, current_user.id).await?;

    tracing::info!(
        "Price of product {} recalculated: cost {:.2}, suggested {:.2}",
        id,
        result.pricing.total_cost,
        result.pricing.suggested_price
    );
    state.invalidate_dashboard();
    record(
        &current_user,
        AuditAction::Update,
        MODULE,
        "products",
        id,
        Some(serde_json::json!({
            "unitCost": result.product.unit_cost,
            "sellingPrice": result.product.selling_price,
        })),
    );
    Ok(Json(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn product_model() -> product::Model {
        product::Model {
            id: 3,
            name: "Tampa".into(),
            code: "PRD-003".into(),
            description: None,
            unit_cost: 0.0,
            selling_price: None,
            formula: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn material(id: i32, price: f64) -> raw_material::Model {
        raw_material::Model {
            id,
            name: format!("Material {}", id),
            code: format!("MP-{:03}", id),
            unit: "kg".into(),
            current_stock: 100.0,
            minimum_stock: 10.0,
            price,
            location_in_warehouse: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn line(id: i32, material_id: i32, quantity: f64) -> product_formula::Model {
        product_formula::Model {
            id,
            product_id: 3,
            material_id,
            quantity,
            unit: "kg".into(),
            description: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn pricing_row(labor: f64, overhead: f64, margin: f64) -> product_pricing::Model {
        let calc = costs(0.0, labor, overhead, margin).calculate();
        product_pricing::Model {
            id: 11,
            product_id: Some(3),
            raw_material_cost: 0.0,
            labor_cost: labor,
            overhead_cost: overhead,
            freight_cost: 0.0,
            taxes: 0.0,
            profit_margin: margin,
            total_cost: calc.total_cost,
            suggested_price: calc.suggested_price,
            margin: calc.margin,
            calculation_date: crate::db::today(),
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    fn simulation(quantity: f64) -> ProductionSimulation {
        ProductionSimulation {
            product_id: 3,
            quantity,
            include_labor: true,
            include_overhead: true,
        }
    }

    fn costs(raw: f64, labor: f64, overhead: f64, margin: f64) -> CostBreakdown {
        CostBreakdown {
            raw_material_cost: raw,
            labor_cost: labor,
            overhead_cost: overhead,
            freight_cost: 0.0,
            taxes: 0.0,
            profit_margin: margin,
        }
    }

    #[test]
    fn test_calculation() {
        let calc = costs(50.0, 30.0, 20.0, 25.0).calculate();
        assert_eq!(calc.total_cost, 100.0);
        assert_eq!(calc.suggested_price, 125.0);
        assert!((calc.margin - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_price_has_zero_margin() {
        let calc = CostBreakdown::default().calculate();
        assert_eq!(calc.suggested_price, 0.0);
        assert_eq!(calc.margin, 0.0);
    }

    #[test]
    fn test_negative_cost_rejected() {
        assert!(costs(-1.0, 0.0, 0.0, 10.0).validate().is_err());
        assert!(costs(1.0, 0.0, f64::NAN, 10.0).validate().is_err());
        assert!(costs(1.0, 0.0, 0.0, 10.0).validate().is_ok());
    }

    #[test]
    fn test_merge_keeps_unsent_fields() {
        let patch = UpdatePricing {
            product_id: None,
            raw_material_cost: None,
            labor_cost: Some(40.0),
            overhead_cost: None,
            freight_cost: None,
            taxes: None,
            profit_margin: None,
            calculation_date: None,
        };
        let merged = patch.merge(costs(50.0, 30.0, 20.0, 25.0));
        assert_eq!(merged, costs(50.0, 40.0, 20.0, 25.0));
    }

    #[test]
    fn test_simulation_json_shape() {
        let calc = costs(10.0, 0.0, 0.0, 100.0).calculate();
        let json = serde_json::to_value(calc).unwrap();
        assert_eq!(json["rawMaterialCost"], 10.0);
        assert_eq!(json["totalCost"], 10.0);
        assert_eq!(json["suggestedPrice"], 20.0);
        assert_eq!(json["margin"], 50.0);
    }

    #[test]
    fn test_material_costs() {
        let formula = [line(1, 1, 2.0), line(2, 2, 0.5), line(3, 99, 1.0)];
        let materials = [material(1, 10.0), material(2, 4.0)];
        let lines = material_costs(&formula, &materials, 1.0);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].cost, 20.0);
        assert_eq!(lines[1].cost, 2.0);
        assert_eq!(total_material_cost(&lines), 22.0);

        let batch = material_costs(&formula, &materials, 10.0);
        assert_eq!(batch[0].quantity, 20.0);
        assert_eq!(total_material_cost(&batch), 220.0);
    }

    #[test]
    fn test_formula_breakdown_defaults_to_thirty_percent() {
        let costs = formula_breakdown(22.0, None);
        assert_eq!(costs.raw_material_cost, 22.0);
        assert_eq!(costs.labor_cost, 0.0);
        assert_eq!(costs.profit_margin, DEFAULT_PROFIT_MARGIN);
        assert!((costs.calculate().suggested_price - 28.6).abs() < 1e-9);

        let row = pricing_row(5.0, 3.0, 50.0);
        let costs = formula_breakdown(22.0, Some(&row));
        assert_eq!(costs.raw_material_cost, 22.0);
        assert_eq!(costs.labor_cost, 5.0);
        assert_eq!(costs.calculate().suggested_price, 45.0);
    }

    #[test]
    fn test_simulate_production() {
        let formula = [line(1, 1, 2.0), line(2, 2, 0.5)];
        let materials = [material(1, 10.0), material(2, 4.0)];
        let row = pricing_row(5.0, 3.0, 50.0);

        let result =
            simulate_production(&simulation(10.0), &product_model(), &formula, &materials, Some(&row))
                .unwrap();
        assert!((result.material_cost - 22.0).abs() < 1e-9);
        assert!((result.unit_cost - 30.0).abs() < 1e-9);
        assert!((result.total_cost - 300.0).abs() < 1e-9);
        assert!((result.suggested_price - 45.0).abs() < 1e-9);
        assert_eq!(result.materials[0].quantity, 20.0);

        let materials_only = ProductionSimulation {
            include_labor: false,
            include_overhead: false,
            ..simulation(1.0)
        };
        let result =
            simulate_production(&materials_only, &product_model(), &formula, &materials, None).unwrap();
        assert!((result.unit_cost - 22.0).abs() < 1e-9);
        assert_eq!(result.profit_margin, DEFAULT_PROFIT_MARGIN);
    }

    #[test]
    fn test_simulation_needs_formula_and_quantity() {
        let materials = [material(1, 10.0)];
        let err = simulate_production(&simulation(5.0), &product_model(), &[], &materials, None)
            .unwrap_err();
        assert_eq!(err.to_string(), NO_FORMULA);

        let formula = [line(1, 1, 1.0)];
        assert!(matches!(
            simulate_production(&simulation(0.0), &product_model(), &formula, &materials, None),
            Err(AppError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_recalculate_creates_pricing_with_default_margin() {
        let saved_pricing = pricing_row(0.0, 0.0, DEFAULT_PROFIT_MARGIN);
        let saved_product = product::Model {
            unit_cost: 22.0,
            selling_price: Some(28.6),
            ..product_model()
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![product_model()]])
            .append_query_results([vec![line(1, 1, 2.0), line(2, 2, 0.5)]])
            .append_query_results([vec![material(1, 10.0), material(2, 4.0)]])
            .append_query_results([Vec::<product_pricing::Model>::new()])
            .append_query_results([vec![saved_pricing.clone()]])
            .append_query_results([vec![saved_product.clone()]])
            .into_connection();

        let result = recalculate_price(&db, 3, 1).await.unwrap();
        assert_eq!(result.product, saved_product);
        assert_eq!(result.pricing, saved_pricing);
        assert_eq!(total_material_cost(&result.materials), 22.0);
    }

    #[tokio::test]
    async fn test_recalculate_without_formula() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![product_model()]])
            .append_query_results([Vec::<product_formula::Model>::new()])
            .into_connection();
        let err = recalculate_price(&db, 3, 1).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
