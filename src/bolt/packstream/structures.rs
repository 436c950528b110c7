//! Graph structures carried inside PackStream values.
//!
//! Nodes and relationships arrive as tagged structures; a path arrives as
//! two interned arrays (unique nodes, unique relationships) plus an index
//! sequence that references them. The in-memory [`Path`] keeps the same
//! shape, so nodes and relationships never hold pointers to each other.

use std::collections::HashMap;

use super::marker::sig;
use super::types::Value;
use super::PackStreamError;

/// A node: identity, labels and properties.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Server-assigned node id.
    pub id: i64,
    /// Labels attached to the node.
    pub labels: Vec<String>,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

impl Node {
    /// Create a node.
    pub fn new(id: i64, labels: Vec<String>, properties: HashMap<String, Value>) -> Self {
        Self { id, labels, properties }
    }

    /// The node's wire fields, in signature order.
    pub fn fields(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::List(self.labels.iter().map(|l| Value::String(l.clone())).collect()),
            Value::Map(self.properties.clone()),
        ]
    }

    /// Rebuild a node from its wire fields.
    pub fn from_fields(mut fields: Vec<Value>) -> Result<Self, PackStreamError> {
        if fields.len() != sig::NODE_FIELDS {
            return Err(PackStreamError::InvalidStructure(format!(
                "Node requires {} fields, got {}",
                sig::NODE_FIELDS,
                fields.len()
            )));
        }
        let properties = take_map(fields.pop(), "Node.properties")?;
        let labels = take_string_list(fields.pop(), "Node.labels")?;
        let id = take_int(fields.pop(), "Node.id")?;
        Ok(Self { id, labels, properties })
    }
}

/// A relationship with both endpoint identities.
#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Id of the start node.
    pub start: i64,
    /// Id of the end node.
    pub end: i64,
    /// Relationship type name.
    pub rel_type: String,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

impl Relationship {
    /// Create a relationship.
    pub fn new(
        id: i64,
        start: i64,
        end: i64,
        rel_type: impl Into<String>,
        properties: HashMap<String, Value>,
    ) -> Self {
        Self { id, start, end, rel_type: rel_type.into(), properties }
    }

    /// The relationship's wire fields, in signature order.
    pub fn fields(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::Integer(self.start),
            Value::Integer(self.end),
            Value::String(self.rel_type.clone()),
            Value::Map(self.properties.clone()),
        ]
    }

    /// Rebuild a relationship from its wire fields.
    pub fn from_fields(mut fields: Vec<Value>) -> Result<Self, PackStreamError> {
        if fields.len() != sig::RELATIONSHIP_FIELDS {
            return Err(PackStreamError::InvalidStructure(format!(
                "Relationship requires {} fields, got {}",
                sig::RELATIONSHIP_FIELDS,
                fields.len()
            )));
        }
        let properties = take_map(fields.pop(), "Relationship.properties")?;
        let rel_type = take_string(fields.pop(), "Relationship.type")?;
        let end = take_int(fields.pop(), "Relationship.end")?;
        let start = take_int(fields.pop(), "Relationship.start")?;
        let id = take_int(fields.pop(), "Relationship.id")?;
        Ok(Self { id, start, end, rel_type, properties })
    }
}

/// A relationship stripped of its endpoints, as interned inside a path.
#[derive(Debug, Clone, PartialEq)]
pub struct UnboundRelationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Relationship type name.
    pub rel_type: String,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

impl UnboundRelationship {
    /// Create an unbound relationship.
    pub fn new(id: i64, rel_type: impl Into<String>, properties: HashMap<String, Value>) -> Self {
        Self { id, rel_type: rel_type.into(), properties }
    }

    /// The wire fields, in signature order.
    pub fn fields(&self) -> Vec<Value> {
        vec![
            Value::Integer(self.id),
            Value::String(self.rel_type.clone()),
            Value::Map(self.properties.clone()),
        ]
    }

    /// Rebuild from wire fields.
    pub fn from_fields(mut fields: Vec<Value>) -> Result<Self, PackStreamError> {
        if fields.len() != sig::UNBOUND_RELATIONSHIP_FIELDS {
            return Err(PackStreamError::InvalidStructure(format!(
                "UnboundRelationship requires {} fields, got {}",
                sig::UNBOUND_RELATIONSHIP_FIELDS,
                fields.len()
            )));
        }
        let properties = take_map(fields.pop(), "UnboundRelationship.properties")?;
        let rel_type = take_string(fields.pop(), "UnboundRelationship.type")?;
        let id = take_int(fields.pop(), "UnboundRelationship.id")?;
        Ok(Self { id, rel_type, properties })
    }

    /// Attach endpoints, producing a full relationship.
    pub fn bind(&self, start: i64, end: i64) -> Relationship {
        Relationship {
            id: self.id,
            start,
            end,
            rel_type: self.rel_type.clone(),
            properties: self.properties.clone(),
        }
    }
}

/// A path: arenas of unique nodes and relationships plus the traversal
/// sequence that indexes into them.
///
/// The sequence interleaves (relationship, node) index pairs. Relationship
/// indices are 1-based and signed: a negative index means the relationship
/// was traversed against its stored start→end orientation. Node indices
/// are 0-based into the node arena; the path start is always `nodes[0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    /// Unique nodes visited by the path.
    pub nodes: Vec<Node>,
    /// Unique relationships traversed by the path.
    pub relationships: Vec<UnboundRelationship>,
    /// Interleaved (rel, node) index pairs.
    pub sequence: Vec<i64>,
}

/// One hop of a path, with the relationship rebound to its endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    /// Node the hop starts from.
    pub start: Node,
    /// The traversed relationship, endpoints resolved.
    pub relationship: Relationship,
    /// Node the hop arrives at.
    pub end: Node,
}

impl Path {
    /// Create a path from its arenas and sequence.
    pub fn new(nodes: Vec<Node>, relationships: Vec<UnboundRelationship>, sequence: Vec<i64>) -> Self {
        Self { nodes, relationships, sequence }
    }

    /// Number of relationships in the path.
    pub fn len(&self) -> usize {
        self.sequence.len() / 2
    }

    /// True for a zero-length path (a single node).
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// The first node of the path.
    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    /// The last node of the path.
    pub fn end(&self) -> Option<&Node> {
        if self.sequence.is_empty() {
            self.nodes.first()
        } else {
            let idx = *self.sequence.last()? as usize;
            self.nodes.get(idx)
        }
    }

    /// Resolve the traversal into segments. Fails if an index falls
    /// outside its arena.
    pub fn segments(&self) -> Result<Vec<PathSegment>, PackStreamError> {
        let mut segments = Vec::with_capacity(self.len());
        let mut prev = self
            .nodes
            .first()
            .ok_or_else(|| PackStreamError::InvalidStructure("Path has no nodes".to_string()))?;

        for pair in self.sequence.chunks(2) {
            let (rel_idx, node_idx) = match pair {
                [r, n] => (*r, *n),
                _ => {
                    return Err(PackStreamError::InvalidStructure(
                        "Path sequence has odd length".to_string(),
                    ))
                }
            };
            let reversed = rel_idx < 0;
            let arena_idx = (rel_idx.unsigned_abs() as usize)
                .checked_sub(1)
                .ok_or_else(|| {
                    PackStreamError::InvalidStructure("Path relationship index is zero".to_string())
                })?;
            let rel = self.relationships.get(arena_idx).ok_or_else(|| {
                PackStreamError::InvalidStructure(format!(
                    "Path relationship index {} out of range",
                    rel_idx
                ))
            })?;
            let next = self.nodes.get(node_idx as usize).ok_or_else(|| {
                PackStreamError::InvalidStructure(format!(
                    "Path node index {} out of range",
                    node_idx
                ))
            })?;

            // A reversed hop stores end→start relative to traversal order.
            let relationship = if reversed {
                rel.bind(next.id, prev.id)
            } else {
                rel.bind(prev.id, next.id)
            };
            segments.push(PathSegment {
                start: prev.clone(),
                relationship,
                end: next.clone(),
            });
            prev = next;
        }

        Ok(segments)
    }

    /// The path's wire fields, in signature order.
    pub fn fields(&self) -> Vec<Value> {
        vec![
            Value::List(self.nodes.iter().cloned().map(Value::Node).collect()),
            Value::List(
                self.relationships
                    .iter()
                    .cloned()
                    .map(Value::UnboundRelationship)
                    .collect(),
            ),
            Value::List(self.sequence.iter().map(|i| Value::Integer(*i)).collect()),
        ]
    }

    /// Rebuild a path from its wire fields.
    pub fn from_fields(mut fields: Vec<Value>) -> Result<Self, PackStreamError> {
        if fields.len() != sig::PATH_FIELDS {
            return Err(PackStreamError::InvalidStructure(format!(
                "Path requires {} fields, got {}",
                sig::PATH_FIELDS,
                fields.len()
            )));
        }
        let sequence = match fields.pop() {
            Some(Value::List(items)) => items
                .into_iter()
                .map(|v| {
                    v.as_int().ok_or_else(|| {
                        PackStreamError::InvalidStructure(
                            "Path sequence entries must be integers".to_string(),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(unexpected_field("Path.sequence", other)),
        };
        let relationships = match fields.pop() {
            Some(Value::List(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::UnboundRelationship(r) => Ok(r),
                    other => Err(unexpected_field("Path.relationships", Some(other))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(unexpected_field("Path.relationships", other)),
        };
        let nodes = match fields.pop() {
            Some(Value::List(items)) => items
                .into_iter()
                .map(|v| match v {
                    Value::Node(n) => Ok(n),
                    other => Err(unexpected_field("Path.nodes", Some(other))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            other => return Err(unexpected_field("Path.nodes", other)),
        };
        Ok(Self { nodes, relationships, sequence })
    }
}

fn unexpected_field(what: &str, value: Option<Value>) -> PackStreamError {
    PackStreamError::InvalidStructure(format!(
        "{} has unexpected type {}",
        what,
        value.map(|v| v.type_name()).unwrap_or("missing")
    ))
}

fn take_int(value: Option<Value>, what: &str) -> Result<i64, PackStreamError> {
    match value {
        Some(Value::Integer(i)) => Ok(i),
        other => Err(unexpected_field(what, other)),
    }
}

fn take_string(value: Option<Value>, what: &str) -> Result<String, PackStreamError> {
    match value {
        Some(Value::String(s)) => Ok(s),
        other => Err(unexpected_field(what, other)),
    }
}

fn take_map(value: Option<Value>, what: &str) -> Result<HashMap<String, Value>, PackStreamError> {
    match value {
        Some(Value::Map(m)) => Ok(m),
        other => Err(unexpected_field(what, other)),
    }
}

fn take_string_list(value: Option<Value>, what: &str) -> Result<Vec<String>, PackStreamError> {
    match value {
        Some(Value::List(items)) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(unexpected_field(what, Some(other))),
            })
            .collect(),
        other => Err(unexpected_field(what, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, label: &str) -> Node {
        Node::new(id, vec![label.to_string()], HashMap::new())
    }

    fn rel(id: i64, rel_type: &str) -> UnboundRelationship {
        UnboundRelationship::new(id, rel_type, HashMap::new())
    }

    #[test]
    fn node_field_roundtrip() {
        let mut props = HashMap::new();
        props.insert("name".to_string(), Value::String("Alice".into()));
        let n = Node::new(1, vec!["Person".to_string()], props);
        let back = Node::from_fields(n.fields()).unwrap();
        assert_eq!(n, back);
    }

    #[test]
    fn node_wrong_field_count() {
        let err = Node::from_fields(vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, PackStreamError::InvalidStructure(_)));
    }

    #[test]
    fn relationship_field_roundtrip() {
        let r = Relationship::new(9, 1, 2, "KNOWS", HashMap::new());
        let back = Relationship::from_fields(r.fields()).unwrap();
        assert_eq!(r, back);
    }

    #[test]
    fn unbound_bind_attaches_endpoints() {
        let bound = rel(5, "LIKES").bind(1, 2);
        assert_eq!(bound.id, 5);
        assert_eq!(bound.start, 1);
        assert_eq!(bound.end, 2);
        assert_eq!(bound.rel_type, "LIKES");
    }

    #[test]
    fn empty_path_is_single_node() {
        let p = Path::new(vec![node(1, "A")], vec![], vec![]);
        assert!(p.is_empty());
        assert_eq!(p.len(), 0);
        assert_eq!(p.start().map(|n| n.id), Some(1));
        assert_eq!(p.end().map(|n| n.id), Some(1));
        assert!(p.segments().unwrap().is_empty());
    }

    #[test]
    fn forward_path_segments() {
        // (1)-[10]->(2)-[11]->(3)
        let p = Path::new(
            vec![node(1, "A"), node(2, "B"), node(3, "C")],
            vec![rel(10, "NEXT"), rel(11, "NEXT")],
            vec![1, 1, 2, 2],
        );
        assert_eq!(p.len(), 2);
        let segments = p.segments().unwrap();
        assert_eq!(segments[0].start.id, 1);
        assert_eq!(segments[0].relationship.start, 1);
        assert_eq!(segments[0].relationship.end, 2);
        assert_eq!(segments[1].end.id, 3);
        assert_eq!(p.end().map(|n| n.id), Some(3));
    }

    #[test]
    fn negative_index_reverses_direction() {
        // (1)<-[10]-(2): traversed from 1 to 2 against the stored orientation.
        let p = Path::new(
            vec![node(1, "A"), node(2, "B")],
            vec![rel(10, "NEXT")],
            vec![-1, 1],
        );
        let segments = p.segments().unwrap();
        assert_eq!(segments[0].start.id, 1);
        assert_eq!(segments[0].end.id, 2);
        // Stored orientation runs 2 -> 1.
        assert_eq!(segments[0].relationship.start, 2);
        assert_eq!(segments[0].relationship.end, 1);
    }

    #[test]
    fn out_of_range_indices_fail() {
        let p = Path::new(vec![node(1, "A")], vec![rel(10, "NEXT")], vec![2, 0]);
        assert!(p.segments().is_err());

        let p = Path::new(vec![node(1, "A")], vec![rel(10, "NEXT")], vec![1, 4]);
        assert!(p.segments().is_err());
    }

    #[test]
    fn path_field_roundtrip() {
        let p = Path::new(
            vec![node(1, "A"), node(2, "B")],
            vec![rel(10, "NEXT")],
            vec![1, 1],
        );
        let back = Path::from_fields(p.fields()).unwrap();
        assert_eq!(p, back);
    }
}
