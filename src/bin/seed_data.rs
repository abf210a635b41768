//! Seed data script - populates the catalog with demo macrame products
//!
//! Run with: cargo run --bin seed-data
//!
//! Products whose slug already exists are left alone, so the script can be
//! re-run against a live database.

use anyhow::Context;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use tracing::info;
use uuid::Uuid;

use storefront_api::{
    config, db,
    entities::{product, product_variant, Product},
};

struct SeedProduct {
    name: &'static str,
    slug: &'static str,
    price_cents: i64,
    stock: i32,
    /// (color, size, price override, stock)
    variants: &'static [(&'static str, &'static str, Option<i64>, i32)],
}

const CATALOG: &[SeedProduct] = &[
    SeedProduct {
        name: "Boho Wall Hanging",
        slug: "boho-wall-hanging",
        price_cents: 4500,
        stock: 12,
        variants: &[
            ("Natural", "Medium", None, 6),
            ("Natural", "Large", Some(6500), 4),
            ("Terracotta", "Medium", Some(4800), 2),
        ],
    },
    SeedProduct {
        name: "Plant Hanger",
        slug: "plant-hanger",
        price_cents: 1999,
        stock: 30,
        variants: &[],
    },
    SeedProduct {
        name: "Table Runner",
        slug: "table-runner",
        price_cents: 3200,
        stock: 8,
        variants: &[("Ivory", "180cm", None, 5), ("Ivory", "240cm", Some(3900), 3)],
    },
    SeedProduct {
        name: "Coaster Set",
        slug: "coaster-set",
        price_cents: 1200,
        stock: 40,
        variants: &[],
    },
    SeedProduct {
        name: "Macrame Mirror",
        slug: "macrame-mirror",
        price_cents: 8900,
        stock: 3,
        variants: &[],
    },
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to the database")?;
    db::run_migrations(&pool).await.context("migrations failed")?;

    let mut created = 0;
    for seed in CATALOG {
        if seed_product(&pool, seed).await? {
            created += 1;
        }
    }

    info!(created, total = CATALOG.len(), "Catalog seeded");
    Ok(())
}

async fn seed_product(db: &DatabaseConnection, seed: &SeedProduct) -> anyhow::Result<bool> {
    let existing = Product::find()
        .filter(product::Column::Slug.eq(seed.slug))
        .one(db)
        .await?;
    if existing.is_some() {
        info!(slug = seed.slug, "Product already present");
        return Ok(false);
    }

    let now = Utc::now();
    let product = product::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(seed.name.to_string()),
        slug: Set(seed.slug.to_string()),
        image: Set(format!("/images/{}.jpg", seed.slug)),
        price_cents: Set(seed.price_cents),
        stock: Set(seed.stock),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    for (color, size, price_cents, stock) in seed.variants {
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            color: Set(Some(color.to_string())),
            size: Set(Some(size.to_string())),
            price_cents: Set(*price_cents),
            stock: Set(*stock),
            created_at: Set(now),
        }
        .insert(db)
        .await?;
    }

    info!(slug = seed.slug, variants = seed.variants.len(), "Created product");
    Ok(true)
}
