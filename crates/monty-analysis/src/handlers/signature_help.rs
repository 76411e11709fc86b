//! Handlers for signature help requests.

use lsp_types::Documentation;
use lsp_types::ParameterInformation;
use lsp_types::ParameterLabel;
use lsp_types::SignatureHelp;
use lsp_types::SignatureInformation;

use crate::contracts::Overload;
use crate::edit::SourcePosition;
use crate::handlers::Snapshot;

/// Handles a signature help request against the given snapshot.
pub(crate) fn signature_help(
    snapshot: &Snapshot,
    position: SourcePosition,
) -> Option<SignatureHelp> {
    let call = snapshot.tree.find_call(snapshot.part, position)?;
    let overloads =
        snapshot
            .services
            .analyzer
            .overloads(snapshot.entry.uri(), &call.callee, position);
    if overloads.is_empty() {
        return None;
    }

    let active_parameter = call.argument_index;

    // The active signature is the lowest-arity overload that still has a
    // parameter at the active index
    let active_signature = overloads
        .iter()
        .enumerate()
        .filter(|(_, overload)| overload.parameters.len() as u32 > active_parameter)
        .min_by_key(|(_, overload)| overload.parameters.len())
        .map(|(index, _)| index as u32);

    let signatures = overloads.into_iter().map(signature).collect();
    Some(SignatureHelp {
        signatures,
        active_signature,
        active_parameter: Some(active_parameter),
    })
}

/// Converts an overload into LSP signature information.
fn signature(overload: Overload) -> SignatureInformation {
    let mut label = String::new();
    label.push_str(&overload.name);
    label.push('(');
    for (index, parameter) in overload.parameters.iter().enumerate() {
        if index > 0 {
            label.push_str(", ");
        }

        label.push_str(&parameter.name);
        if let Some(default) = &parameter.default_value {
            label.push('=');
            label.push_str(default);
        }
    }
    label.push(')');

    let parameters = overload
        .parameters
        .into_iter()
        .map(|parameter| ParameterInformation {
            label: ParameterLabel::Simple(parameter.name),
            documentation: parameter.documentation.map(Documentation::String),
        })
        .collect();

    SignatureInformation {
        label,
        documentation: overload.documentation.map(Documentation::String),
        parameters: Some(parameters),
        active_parameter: None,
    }
}
