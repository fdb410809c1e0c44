//! Built-in node loading, one category at a time.

use kestrel_core::types::NodeCategory;

use crate::builtin::{data, files, flow, interaction, network, session};
use crate::registry::NodeRegistry;

/// Register every built-in node of one category. Returns how many were accepted.
pub fn register_category(registry: &mut NodeRegistry, category: NodeCategory) -> usize {
    let accepted = match category {
        NodeCategory::Flow => vec![
            registry.register(flow::StartNode),
            registry.register(flow::ConditionNode),
            registry.register(flow::SetVariableNode),
            registry.register(flow::DelayNode),
            registry.register(flow::LogNode),
        ],

        NodeCategory::Session => vec![
            registry.register(session::NavigateNode),
            registry.register(session::ClickElementNode),
            registry.register(session::TypeTextNode),
            registry.register(session::WaitForNode),
            registry.register(session::ReadTextNode),
            registry.register(session::CurrentUrlNode),
        ],

        NodeCategory::Interaction => vec![
            registry.register(interaction::FindElementNode),
            registry.register(interaction::PressKeyNode),
            registry.register(interaction::UploadFileNode),
        ],

        NodeCategory::Data => vec![
            registry.register(data::DbSelectNode),
            registry.register(data::DbInsertNode),
            registry.register(data::DbUpdateNode),
            registry.register(data::DbDeleteNode),
            registry.register(files::FileReadNode),
            registry.register(files::FileWriteNode),
        ],

        NodeCategory::Network => vec![registry.register(network::HttpRequestNode)],
    };
    accepted.into_iter().filter(|ok| *ok).count()
}
