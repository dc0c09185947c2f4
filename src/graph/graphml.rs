use std::path::Path;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{PipelineError, Result};
use crate::graph::{Edge, Graph, GraphKey, Node};

const GRAPHML_NS: &str = "http://graphml.graphdrawing.org/xmlns";

/// Element currently receiving `<data>` children.
enum Owner {
    Graph,
    Node(Node),
    Edge(Edge),
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.local_name().as_ref() == name.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn required(e: &BytesStart<'_>, name: &str) -> Result<String> {
    attribute(e, name)?.ok_or_else(|| {
        PipelineError::Graph(format!(
            "<{}> is missing attribute {}",
            String::from_utf8_lossy(e.local_name().as_ref()),
            name
        ))
    })
}

pub fn parse(xml: &str) -> Result<Graph> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut graph = Graph::default();
    let mut owner: Option<Owner> = None;
    // (key id, accumulated text) of the open <data> element
    let mut data: Option<(String, String)> = None;

    loop {
        let event = reader.read_event()?;
        let empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"key" => graph.keys.push(GraphKey {
                    id: required(&e, "id")?,
                    domain: attribute(&e, "for")?.unwrap_or_else(|| "all".to_string()),
                    name: attribute(&e, "attr.name")?.unwrap_or_default(),
                    attr_type: attribute(&e, "attr.type")?.unwrap_or_else(|| "string".to_string()),
                }),
                b"graph" => {
                    graph.id = attribute(&e, "id")?;
                    if let Some(d) = attribute(&e, "edgedefault")? {
                        graph.edge_default = d;
                    }
                    owner = Some(Owner::Graph);
                }
                b"node" => {
                    let node = Node::new(required(&e, "id")?);
                    if empty {
                        graph.nodes.push(node);
                    } else {
                        owner = Some(Owner::Node(node));
                    }
                }
                b"edge" => {
                    let mut edge = Edge::new(required(&e, "source")?, required(&e, "target")?);
                    edge.id = attribute(&e, "id")?;
                    if empty {
                        graph.edges.push(edge);
                    } else {
                        owner = Some(Owner::Edge(edge));
                    }
                }
                b"data" => {
                    let entry = (required(&e, "key")?, String::new());
                    if empty {
                        push_data(&mut owner, &mut graph, entry);
                    } else {
                        data = Some(entry);
                    }
                }
                _ => {}
            },
            Event::Text(t) => {
                if let Some((_, value)) = data.as_mut() {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, value)) = data.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"data" => {
                    if let Some(entry) = data.take() {
                        push_data(&mut owner, &mut graph, entry);
                    }
                }
                b"node" => {
                    if let Some(Owner::Node(node)) = owner.take() {
                        graph.nodes.push(node);
                    }
                    owner = Some(Owner::Graph);
                }
                b"edge" => {
                    if let Some(Owner::Edge(edge)) = owner.take() {
                        graph.edges.push(edge);
                    }
                    owner = Some(Owner::Graph);
                }
                b"graph" => owner = None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(graph)
}

fn push_data(owner: &mut Option<Owner>, graph: &mut Graph, entry: (String, String)) {
    match owner {
        Some(Owner::Node(node)) => node.data.push(entry),
        Some(Owner::Edge(edge)) => edge.data.push(entry),
        Some(Owner::Graph) => graph.data.push(entry),
        None => {}
    }
}

pub fn read(path: &Path) -> Result<Graph> {
    if !path.exists() {
        return Err(PipelineError::NotFound(path.display().to_string()));
    }
    parse(&std::fs::read_to_string(path)?)
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| PipelineError::Graph(e.to_string()))
}

fn emit_data(writer: &mut Writer<Vec<u8>>, data: &[(String, String)]) -> Result<()> {
    for (key, value) in data {
        let mut start = BytesStart::new("data");
        start.push_attribute(("key", key.as_str()));
        emit(writer, Event::Start(start))?;
        emit(writer, Event::Text(BytesText::new(value)))?;
        emit(writer, Event::End(BytesEnd::new("data")))?;
    }
    Ok(())
}

pub fn to_string(graph: &Graph) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    emit(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut root = BytesStart::new("graphml");
    root.push_attribute(("xmlns", GRAPHML_NS));
    emit(&mut writer, Event::Start(root))?;

    for key in &graph.keys {
        let mut start = BytesStart::new("key");
        start.push_attribute(("id", key.id.as_str()));
        start.push_attribute(("for", key.domain.as_str()));
        start.push_attribute(("attr.name", key.name.as_str()));
        start.push_attribute(("attr.type", key.attr_type.as_str()));
        emit(&mut writer, Event::Empty(start))?;
    }

    let mut start = BytesStart::new("graph");
    if let Some(id) = &graph.id {
        start.push_attribute(("id", id.as_str()));
    }
    start.push_attribute(("edgedefault", graph.edge_default.as_str()));
    emit(&mut writer, Event::Start(start))?;
    emit_data(&mut writer, &graph.data)?;

    for node in &graph.nodes {
        let mut start = BytesStart::new("node");
        start.push_attribute(("id", node.id.as_str()));
        if node.data.is_empty() {
            emit(&mut writer, Event::Empty(start))?;
            continue;
        }
        emit(&mut writer, Event::Start(start))?;
        emit_data(&mut writer, &node.data)?;
        emit(&mut writer, Event::End(BytesEnd::new("node")))?;
    }

    for edge in &graph.edges {
        let mut start = BytesStart::new("edge");
        if let Some(id) = &edge.id {
            start.push_attribute(("id", id.as_str()));
        }
        start.push_attribute(("source", edge.source.as_str()));
        start.push_attribute(("target", edge.target.as_str()));
        if edge.data.is_empty() {
            emit(&mut writer, Event::Empty(start))?;
            continue;
        }
        emit(&mut writer, Event::Start(start))?;
        emit_data(&mut writer, &edge.data)?;
        emit(&mut writer, Event::End(BytesEnd::new("edge")))?;
    }

    emit(&mut writer, Event::End(BytesEnd::new("graph")))?;
    emit(&mut writer, Event::End(BytesEnd::new("graphml")))?;

    String::from_utf8(writer.into_inner()).map_err(|e| PipelineError::Graph(e.to_string()))
}

pub fn write(graph: &Graph, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, to_string(graph)?)?;
    Ok(())
}
