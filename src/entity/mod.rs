//! Entity module - SeaORM entity definitions
//!
//! One file per table. Foreign keys that matter for integrity are declared as
//! `belongs_to` relations so auto-migration creates the constraints.

pub mod account;
pub mod chat_message;
pub mod chat_room;
pub mod chat_room_participant;
pub mod company;
pub mod customer;
pub mod department;
pub mod employee;
pub mod equipment;
pub mod expense;
pub mod fiscal_config;
pub mod inventory_movement;
pub mod maintenance_order;
pub mod nfe;
pub mod nfe_evento;
pub mod nfe_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_formula;
pub mod product_pricing;
pub mod production_loss;
pub mod production_order;
pub mod quality_inspection;
pub mod quotation;
pub mod quotation_item;
pub mod raw_material;
pub mod supplier;
pub mod supplier_quotation;
pub mod support_ticket;
pub mod system_alert;
pub mod system_audit_log;
pub mod user;
