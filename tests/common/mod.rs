//! Row types and contexts shared by the integration tests
#![allow(dead_code)]

use airquery::engine::adapter::{CursorRow, RowValues, SqliteStore};
use airquery::engine::record::ForeignChildren;
use airquery::{Children, ColumnDef, ForeignKey, LazyChildren, QueryContext, Record, Result, RowSchema};

// ----------------------------------------------------------------------
// Person -> Pet
// ----------------------------------------------------------------------

pub static PERSON_SCHEMA: RowSchema = RowSchema::new(
    "person",
    &[ColumnDef::integer("_id"), ColumnDef::text("name"), ColumnDef::integer("age")],
)
.with_identity("_id")
.with_foreign_keys(&[ForeignKey::new("pets", "pets", "owner_id")]);

#[derive(Debug, Clone, PartialEq)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub age: i64,
    pub pets: Children<Pet>,
}

impl Record for Person {
    fn schema() -> &'static RowSchema {
        &PERSON_SCHEMA
    }

    fn to_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert("_id".into(), self.id.into());
        values.insert("name".into(), self.name.as_str().into());
        values.insert("age".into(), self.age.into());
        values
    }

    fn from_row(row: &CursorRow<'_>) -> Result<Self> {
        Ok(Self {
            id: row.require_i64("_id")?,
            name: row.require_string("name")?,
            age: row.get_i64("age").unwrap_or_default(),
            pets: Children::Lazy(LazyChildren::unloaded()),
        })
    }

    fn identity(&self) -> i64 {
        self.id
    }

    fn set_identity(&mut self, id: i64) {
        self.id = id;
    }

    fn foreign_children(&mut self, field: &str) -> Option<&mut dyn ForeignChildren> {
        match field {
            "pets" => Some(&mut self.pets),
            _ => None,
        }
    }
}

pub static PET_SCHEMA: RowSchema = RowSchema::new(
    "pet",
    &[ColumnDef::integer("_id"), ColumnDef::integer("owner_id"), ColumnDef::text("name")],
)
.with_identity("_id");

#[derive(Debug, Clone, PartialEq)]
pub struct Pet {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
}

impl Record for Pet {
    fn schema() -> &'static RowSchema {
        &PET_SCHEMA
    }

    fn to_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert("_id".into(), self.id.into());
        values.insert("owner_id".into(), self.owner_id.into());
        values.insert("name".into(), self.name.as_str().into());
        values
    }

    fn from_row(row: &CursorRow<'_>) -> Result<Self> {
        Ok(Self {
            id: row.require_i64("_id")?,
            owner_id: row.get_i64("owner_id").unwrap_or_default(),
            name: row.require_string("name")?,
        })
    }

    fn identity(&self) -> i64 {
        self.id
    }

    fn set_identity(&mut self, id: i64) {
        self.id = id;
    }

    fn set_foreign_key(&mut self, column: &str, parent_id: i64) -> bool {
        match column {
            "owner_id" => {
                self.owner_id = parent_id;
                true
            }
            _ => false,
        }
    }
}

pub fn person(name: &str, age: i64, pets: &[&str]) -> Person {
    Person {
        id: 0,
        name: name.to_string(),
        age,
        pets: pets.iter().map(|p| pet(p)).collect::<Vec<_>>().into(),
    }
}

pub fn pet(name: &str) -> Pet {
    Pet {
        id: 0,
        owner_id: 0,
        name: name.to_string(),
    }
}

// ----------------------------------------------------------------------
// Product, read leniently so partial projections still map
// ----------------------------------------------------------------------

pub static PRODUCT_SCHEMA: RowSchema = RowSchema::new(
    "product",
    &[ColumnDef::integer("_id"), ColumnDef::text("name"), ColumnDef::integer("category")],
)
.with_identity("_id");

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: i64,
}

impl Record for Product {
    fn schema() -> &'static RowSchema {
        &PRODUCT_SCHEMA
    }

    fn to_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert("_id".into(), self.id.into());
        values.insert("name".into(), self.name.as_str().into());
        values.insert("category".into(), self.category.into());
        values
    }

    fn from_row(row: &CursorRow<'_>) -> Result<Self> {
        Ok(Self {
            id: row.get_i64("_id").unwrap_or_default(),
            name: row.get_string("name").unwrap_or_default(),
            category: row.get_i64("category").unwrap_or_default(),
        })
    }

    fn identity(&self) -> i64 {
        self.id
    }

    fn set_identity(&mut self, id: i64) {
        self.id = id;
    }
}

pub fn product(name: &str, category: i64) -> Product {
    Product {
        id: 0,
        name: name.to_string(),
        category,
    }
}

// ----------------------------------------------------------------------
// Note, used against the content provider
// ----------------------------------------------------------------------

pub static NOTE_SCHEMA: RowSchema =
    RowSchema::new("note", &[ColumnDef::integer("_id"), ColumnDef::text("title"), ColumnDef::text("body")])
        .with_identity("_id");

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: i64,
    pub title: String,
    pub body: String,
}

impl Record for Note {
    fn schema() -> &'static RowSchema {
        &NOTE_SCHEMA
    }

    fn to_values(&self) -> RowValues {
        let mut values = RowValues::new();
        values.insert("_id".into(), self.id.into());
        values.insert("title".into(), self.title.as_str().into());
        values.insert("body".into(), self.body.as_str().into());
        values
    }

    fn from_row(row: &CursorRow<'_>) -> Result<Self> {
        Ok(Self {
            id: row.require_i64("_id")?,
            title: row.require_string("title")?,
            body: row.get_string("body").unwrap_or_default(),
        })
    }

    fn identity(&self) -> i64 {
        self.id
    }

    fn set_identity(&mut self, id: i64) {
        self.id = id;
    }
}

pub fn note(title: &str, body: &str) -> Note {
    Note {
        id: 0,
        title: title.to_string(),
        body: body.to_string(),
    }
}

// ----------------------------------------------------------------------
// Contexts
// ----------------------------------------------------------------------

pub fn local_context() -> QueryContext {
    QueryContext::builder("test")
        .local_store(SqliteStore::in_memory().expect("in-memory store"))
        .build()
}

pub fn count<R: Record>(ctx: &QueryContext, table: &str) -> usize {
    ctx.select::<R>(table)
        .and_then(|q| q.all())
        .expect("count query")
        .map_or(0, |rows| rows.len())
}
