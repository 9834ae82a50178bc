//! ProductSet and Product lifecycle workflow.
//!
//! Four independent chains, each Create -> Get -> Update -> Delete:
//!
//! - product set, service-generated id
//! - product, service-generated id
//! - product set, pinned id, with a second Create of the same id
//! - product, pinned id, with a second Create of the same id
//!
//! In the generated-id chains the later tasks read the id from the Create
//! task's output. In the pinned-id chains every task names the id directly.

use crate::config::Config;
use crate::core::dag::{GraphBuilder, TaskGraph};
use crate::core::task::{Payload, ResourceId, TaskNode};
use crate::error::Result;
use serde_json::json;

pub const PRODUCT_SETS: &str = "product_sets";
pub const PRODUCTS: &str = "products";

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

struct Chain<'a> {
    prefix: &'a str,
    suffix: &'a str,
    resource: &'a str,
    created: Payload,
    updated: Payload,
    pinned_id: Option<&'a str>,
}

impl Chain<'_> {
    fn name(&self, step: &str) -> String {
        format!("{}_{}{}", self.prefix, step, self.suffix)
    }

    fn add_to(self, builder: GraphBuilder, config: &Config) -> GraphBuilder {
        let create_name = self.name("create");
        let mut create = TaskNode::create(&create_name, self.resource)
            .with_payload(self.created.clone())
            .with_location(&config.location);
        if let Some(timeout) = config.task_timeout() {
            create = create.with_timeout(timeout);
        }

        let id = match self.pinned_id {
            Some(id) => ResourceId::Literal(id.to_string()),
            None => ResourceId::Reference(create_name.clone()),
        };
        let get = TaskNode::get(&self.name("get"), self.resource, id.clone())
            .with_location(&config.location);
        let update = TaskNode::update(&self.name("update"), self.resource, id.clone())
            .with_payload(self.updated.clone())
            .with_location(&config.location);
        let delete = TaskNode::delete(&self.name("delete"), self.resource, id)
            .with_location(&config.location);

        let mut names = vec![create_name];
        let mut builder = builder;
        if let Some(id) = self.pinned_id {
            let repeat = create.clone().with_id(id);
            create = create.with_id(id);
            let repeat_name = format!("{}_idempotence", names[0]);
            builder = builder.task(create).task(TaskNode {
                name: repeat_name.clone(),
                ..repeat
            });
            names.push(repeat_name);
        } else {
            builder = builder.task(create);
        }

        names.extend([get.name.clone(), update.name.clone(), delete.name.clone()]);
        let chain: Vec<&str> = names.iter().map(String::as_str).collect();
        builder.task(get).task(update).task(delete).chain(&chain)
    }
}

/// Build the example workflow.
pub fn vision_workflow(config: &Config) -> Result<TaskGraph> {
    let product_set = payload(json!({ "display_name": "My Product Set 1" }));
    let product_set_updated = payload(json!({ "display_name": "My Product Set 2" }));
    let product = payload(json!({
        "display_name": "My Product 1",
        "product_category": "toys",
    }));
    let product_updated = payload(json!({
        "display_name": "My Product 2",
        "description": "My updated description",
    }));

    let chains = [
        Chain {
            prefix: "product_set",
            suffix: "",
            resource: PRODUCT_SETS,
            created: product_set.clone(),
            updated: product_set_updated.clone(),
            pinned_id: None,
        },
        Chain {
            prefix: "product",
            suffix: "",
            resource: PRODUCTS,
            created: product.clone(),
            updated: product_updated.clone(),
            pinned_id: None,
        },
        Chain {
            prefix: "product_set",
            suffix: "_2",
            resource: PRODUCT_SETS,
            created: product_set,
            updated: product_set_updated,
            pinned_id: Some(config.product_set_id.as_str()),
        },
        Chain {
            prefix: "product",
            suffix: "_2",
            resource: PRODUCTS,
            created: product,
            updated: product_updated,
            pinned_id: Some(config.product_id.as_str()),
        },
    ];

    chains
        .into_iter()
        .fold(GraphBuilder::new(), |builder, chain| chain.add_to(builder, config))
        .build()
}
