//! Department entity
//!
//! Table: departments

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "departments")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(column_type = "Text", unique)]
    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    /// Managing employee
    pub manager_id: Option<i32>,

    /// Parent department, None for top-level
    pub parent_department_id: Option<i32>,

    #[sea_orm(column_type = "Double", nullable)]
    pub budget: Option<f64>,

    pub created_at: DateTime,
    pub created_by: Option<i32>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::employee::Entity",
        from = "Column::ManagerId",
        to = "super::employee::Column::Id",
        on_delete = "SetNull"
    )]
    Manager,
}

impl ActiveModelBehavior for ActiveModel {}

/// Department tree node
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentTree {
    #[serde(flatten)]
    pub department: Model,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<DepartmentTree>,
}

/// Nest departments under their parents. Departments whose parent is missing
/// are treated as roots.
pub fn build_tree(departments: Vec<Model>) -> Vec<DepartmentTree> {
    let ids: std::collections::HashSet<i32> = departments.iter().map(|d| d.id).collect();
    let (roots, mut rest): (Vec<Model>, Vec<Model>) = departments.into_iter().partition(|d| {
        d.parent_department_id
            .map_or(true, |parent| !ids.contains(&parent) || parent == d.id)
    });

    fn attach(node: Model, rest: &mut Vec<Model>) -> DepartmentTree {
        let (children, remaining): (Vec<Model>, Vec<Model>) = std::mem::take(rest)
            .into_iter()
            .partition(|d| d.parent_department_id == Some(node.id));
        *rest = remaining;
        DepartmentTree {
            department: node,
            children: children.into_iter().map(|c| attach(c, rest)).collect(),
        }
    }

    roots.into_iter().map(|r| attach(r, &mut rest)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dept(id: i32, parent: Option<i32>) -> Model {
        Model {
            id,
            name: format!("D{}", id),
            description: None,
            manager_id: None,
            parent_department_id: parent,
            budget: None,
            created_at: crate::db::now(),
            created_by: None,
        }
    }

    #[test]
    fn test_build_tree() {
        let tree = build_tree(vec![dept(1, None), dept(2, Some(1)), dept(3, Some(2)), dept(4, Some(99))]);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].department.id, 1);
        assert_eq!(tree[0].children[0].department.id, 2);
        assert_eq!(tree[0].children[0].children[0].department.id, 3);
        assert_eq!(tree[1].department.id, 4);
    }
}
