//! HR handlers: employees and departments

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::NaiveDate;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;

use crate::entity::department::{self, build_tree, DepartmentTree};
use crate::entity::employee;
use crate::entity::system_audit_log::AuditAction;
use crate::error::{AppError, AppResult};
use crate::handlers::audit::service::record;
use crate::middleware::{CurrentUser, DbConn};
use crate::permission::perm;
use crate::state::AppState;

use super::{
    apply_patch, apply_patch_nullable, delete_or_404, find_or_404, ilike_any, require_one_of,
    require_text, Created,
};

const MODULE: &str = perm::HR;

#[derive(Debug, Default, Deserialize)]
pub struct EmployeeFilter {
    pub search: Option<String>,
    pub status: Option<String>,
    pub department: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRequest {
    pub name: Option<String>,
    pub cpf: Option<String>,
    pub rg: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub gender: Option<String>,
    pub marital_status: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub cellphone: Option<String>,
    pub position: Option<String>,
    pub department: Option<String>,
    pub hiring_date: Option<NaiveDate>,
    pub salary: Option<f64>,
    pub status: Option<String>,
    pub termination_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub user_id: Option<i32>,
}

/// Keep only the digits of a CPF
pub fn normalize_cpf(cpf: &str) -> String {
    cpf.chars().filter(|c| c.is_ascii_digit()).collect()
}

async fn ensure_unique_cpf<C: ConnectionTrait>(db: &C, cpf: &str, except: Option<i32>) -> AppResult<()> {
    let mut query = employee::Entity::find().filter(employee::Column::Cpf.eq(cpf));
    if let Some(id) = except {
        query = query.filter(employee::Column::Id.ne(id));
    }
    if query.one(db).await?.is_some() {
        return Err(AppError::Conflict("CPF já cadastrado".to_string()));
    }
    Ok(())
}

/// GET /api/employees
pub async fn list_employees(
    Extension(db): Extension<DbConn>,
    Query(filter): Query<EmployeeFilter>,
) -> AppResult<Json<Vec<employee::Model>>> {
    let mut query = employee::Entity::find();
    if let Some(term) = filter.search.as_deref().filter(|s| !s.trim().is_empty()) {
        query = query.filter(ilike_any(
            &[employee::Column::Name, employee::Column::Cpf, employee::Column::Email],
            term,
        ));
    }
    if let Some(status) = filter.status.filter(|s| !s.is_empty()) {
        query = query.filter(employee::Column::Status.eq(status));
    }
    if let Some(department) = filter.department.filter(|s| !s.is_empty()) {
        query = query.filter(employee::Column::Department.eq(department));
    }
    let rows = query.order_by_asc(employee::Column::Name).all(&*db).await?;
    Ok(Json(rows))
}

/// GET /api/employees/:id
pub async fn get_employee(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<employee::Model>> {
    Ok(Json(find_or_404::<employee::Entity, _>(&*db, id, "Funcionário").await?))
}

/// POST /api/employees
pub async fn create_employee(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<EmployeeRequest>,
) -> AppResult<Created<employee::Model>> {
    let name = req.name.unwrap_or_default();
    let position = req.position.unwrap_or_default();
    let department = req.department.unwrap_or_default();
    require_text("name", &name, "Nome é obrigatório")?;
    require_text("position", &position, "Cargo é obrigatório")?;
    require_text("department", &department, "Departamento é obrigatório")?;
    let status = req.status.unwrap_or_else(|| "active".to_string());
    require_one_of("status", &status, &employee::STATUSES)?;

    let cpf = req.cpf.as_deref().map(normalize_cpf).filter(|c| !c.is_empty());
    if let Some(cpf) = &cpf {
        ensure_unique_cpf(&*db, cpf, None).await?;
    }

    let created = employee::ActiveModel {
        name: Set(name),
        cpf: Set(cpf),
        rg: Set(req.rg),
        birth_date: Set(req.birth_date),
        gender: Set(req.gender),
        marital_status: Set(req.marital_status),
        address: Set(req.address),
        city: Set(req.city),
        state: Set(req.state),
        postal_code: Set(req.postal_code),
        email: Set(req.email),
        phone: Set(req.phone),
        cellphone: Set(req.cellphone),
        position: Set(position),
        department: Set(department),
        hiring_date: Set(req.hiring_date.unwrap_or_else(crate::db::today)),
        salary: Set(req.salary),
        status: Set(status),
        termination_date: Set(req.termination_date),
        notes: Set(req.notes),
        user_id: Set(req.user_id),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Create, MODULE, "employees", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/employees/:id
pub async fn update_employee(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(mut req): Json<EmployeeRequest>,
) -> AppResult<Json<employee::Model>> {
    if let Some(status) = &req.status {
        require_one_of("status", status, &employee::STATUSES)?;
    }
    req.cpf = req.cpf.as_deref().map(normalize_cpf).filter(|c| !c.is_empty());
    if let Some(cpf) = &req.cpf {
        ensure_unique_cpf(&*db, cpf, Some(id)).await?;
    }

    let mut model: employee::ActiveModel =
        find_or_404::<employee::Entity, _>(&*db, id, "Funcionário").await?.into();
    apply_patch!(model, req; name, position, department, hiring_date, status);
    apply_patch_nullable!(model, req;
        cpf, rg, birth_date, gender, marital_status, address, city, state, postal_code,
        email, phone, cellphone, salary, termination_date, notes, user_id);
    let updated = model.update(&*db).await?;

    state.invalidate_dashboard();
    record(&current_user, AuditAction::Update, MODULE, "employees", id, None);
    Ok(Json(updated))
}

/// DELETE /api/employees/:id
pub async fn delete_employee(
    State(state): State<AppState>,
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<employee::Entity, _>(&*db, id, "Funcionário").await?;
    state.invalidate_dashboard();
    record(&current_user, AuditAction::Delete, MODULE, "employees", id, None);
    Ok(status)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub manager_id: Option<i32>,
    pub parent_department_id: Option<i32>,
    pub budget: Option<f64>,
}

async fn ensure_unique_name<C: ConnectionTrait>(db: &C, name: &str, except: Option<i32>) -> AppResult<()> {
    let mut query = department::Entity::find().filter(department::Column::Name.eq(name));
    if let Some(id) = except {
        query = query.filter(department::Column::Id.ne(id));
    }
    if query.one(db).await?.is_some() {
        return Err(AppError::Conflict("Já existe um departamento com este nome".to_string()));
    }
    Ok(())
}

/// GET /api/departments
pub async fn list_departments(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<department::Model>>> {
    let rows = department::Entity::find()
        .order_by_asc(department::Column::Name)
        .all(&*db)
        .await?;
    Ok(Json(rows))
}

/// GET /api/departments/tree
pub async fn department_tree(
    Extension(db): Extension<DbConn>,
) -> AppResult<Json<Vec<DepartmentTree>>> {
    let rows = department::Entity::find()
        .order_by_asc(department::Column::Name)
        .all(&*db)
        .await?;
    Ok(Json(build_tree(rows)))
}

/// GET /api/departments/:id
pub async fn get_department(
    Extension(db): Extension<DbConn>,
    Path(id): Path<i32>,
) -> AppResult<Json<department::Model>> {
    Ok(Json(find_or_404::<department::Entity, _>(&*db, id, "Departamento").await?))
}

/// POST /api/departments
pub async fn create_department(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Json(req): Json<DepartmentRequest>,
) -> AppResult<Created<department::Model>> {
    let name = req.name.unwrap_or_default().trim().to_string();
    require_text("name", &name, "Nome é obrigatório")?;
    ensure_unique_name(&*db, &name, None).await?;

    let created = department::ActiveModel {
        name: Set(name),
        description: Set(req.description),
        manager_id: Set(req.manager_id),
        parent_department_id: Set(req.parent_department_id),
        budget: Set(req.budget),
        created_at: Set(crate::db::now()),
        created_by: Set(Some(current_user.id)),
        ..Default::default()
    }
    .insert(&*db)
    .await?;

    record(&current_user, AuditAction::Create, MODULE, "departments", created.id, None);
    Ok(Created(created))
}

/// PATCH /api/departments/:id
pub async fn update_department(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(mut req): Json<DepartmentRequest>,
) -> AppResult<Json<department::Model>> {
    if req.parent_department_id == Some(id) {
        return Err(AppError::field(
            "parentDepartmentId",
            "Um departamento não pode ser pai de si mesmo",
        ));
    }
    req.name = req.name.map(|n| n.trim().to_string());
    if let Some(name) = &req.name {
        require_text("name", name, "Nome é obrigatório")?;
        ensure_unique_name(&*db, name, Some(id)).await?;
    }

    let mut model: department::ActiveModel =
        find_or_404::<department::Entity, _>(&*db, id, "Departamento").await?.into();
    apply_patch!(model, req; name);
    apply_patch_nullable!(model, req; description, manager_id, parent_department_id, budget);
    let updated = model.update(&*db).await?;

    record(&current_user, AuditAction::Update, MODULE, "departments", id, None);
    Ok(Json(updated))
}

/// DELETE /api/departments/:id
pub async fn delete_department(
    Extension(db): Extension<DbConn>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<i32>,
) -> AppResult<StatusCode> {
    let status = delete_or_404::<department::Entity, _>(&*db, id, "Departamento").await?;
    record(&current_user, AuditAction::Delete, MODULE, "departments", id, None);
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase};

    fn employee(id: i32) -> employee::Model {
        employee::Model {
            id,
            name: "Maria".into(),
            cpf: Some("12345678901".into()),
            rg: None,
            birth_date: None,
            gender: None,
            marital_status: None,
            address: None,
            city: None,
            state: None,
            postal_code: None,
            email: None,
            phone: None,
            cellphone: None,
            position: "Analista".into(),
            department: "Financeiro".into(),
            hiring_date: crate::db::today(),
            salary: None,
            status: "active".into(),
            termination_date: None,
            notes: None,
            user_id: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_normalize_cpf() {
        assert_eq!(normalize_cpf("123.456.789-01"), "12345678901");
        assert_eq!(normalize_cpf(" - "), "");
    }

    #[tokio::test]
    async fn test_duplicate_cpf_conflicts() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![employee(1)]])
            .append_query_results([Vec::<employee::Model>::new()])
            .into_connection();
        assert!(matches!(
            ensure_unique_cpf(&db, "12345678901", None).await,
            Err(AppError::Conflict(_))
        ));
        assert!(ensure_unique_cpf(&db, "12345678901", Some(1)).await.is_ok());
    }
}
