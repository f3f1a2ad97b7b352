// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 teleflow contributors

//! Graph command - show the pipeline stage graph

use miette::Result;

use super::GraphFormat;
use crate::pipeline::PipelineGraph;

/// Run the graph command
pub async fn run(format: GraphFormat, _verbose: bool) -> Result<()> {
    let graph = PipelineGraph::standard();

    match format {
        GraphFormat::Text => {
            print!("{}", graph.to_text()?);
        }
        GraphFormat::Dot => {
            print!("{}", graph.to_dot());
        }
        GraphFormat::Mermaid => {
            print!("{}", graph.to_mermaid());
        }
    }

    Ok(())
}
