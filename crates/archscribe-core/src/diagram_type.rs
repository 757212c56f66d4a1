// ABOUTME: The catalogue of diagram kinds a task can request, with display names and focus descriptions.
// ABOUTME: Parsed from kebab-case identifiers such as "data-flow" or "database-er".

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagramType {
    #[default]
    SystemArchitecture,
    ComponentStructure,
    DataFlow,
    Microservices,
    ClassDiagram,
    ApiArchitecture,
    DatabaseEr,
}

impl DiagramType {
    pub const ALL: [DiagramType; 7] = [
        DiagramType::SystemArchitecture,
        DiagramType::ComponentStructure,
        DiagramType::DataFlow,
        DiagramType::Microservices,
        DiagramType::ClassDiagram,
        DiagramType::ApiArchitecture,
        DiagramType::DatabaseEr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramType::SystemArchitecture => "system-architecture",
            DiagramType::ComponentStructure => "component-structure",
            DiagramType::DataFlow => "data-flow",
            DiagramType::Microservices => "microservices",
            DiagramType::ClassDiagram => "class-diagram",
            DiagramType::ApiArchitecture => "api-architecture",
            DiagramType::DatabaseEr => "database-er",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            DiagramType::SystemArchitecture => "System Architecture",
            DiagramType::ComponentStructure => "Component Structure",
            DiagramType::DataFlow => "Data Flow",
            DiagramType::Microservices => "Microservices",
            DiagramType::ClassDiagram => "Class Diagram",
            DiagramType::ApiArchitecture => "API Architecture",
            DiagramType::DatabaseEr => "Database ER",
        }
    }

    /// What a diagram of this kind should focus on.
    pub fn description(&self) -> &'static str {
        match self {
            DiagramType::SystemArchitecture => {
                "Show the overall system components, how they relate, and how they interact. Include frontends, backends, databases, external services, and system boundaries."
            }
            DiagramType::ComponentStructure => {
                "Show the directory structure, the main files and modules, and the dependencies between them. Focus on code organization."
            }
            DiagramType::DataFlow => {
                "Show how data moves through the system, from incoming requests through processing to storage and responses, including every transformation."
            }
            DiagramType::Microservices => {
                "Show the individual services, their communication patterns, message queues, service discovery, and inter-service dependencies."
            }
            DiagramType::ClassDiagram => {
                "Show the object-oriented structure: classes, interfaces, inheritance relationships, and key method signatures."
            }
            DiagramType::ApiArchitecture => {
                "Show the REST or GraphQL endpoints, route structure, middleware layers, authentication flow, and request/response patterns."
            }
            DiagramType::DatabaseEr => {
                "Show entities, tables, columns, foreign keys, and the relationships of the data model, based on ORM models or schema definitions."
            }
        }
    }
}

impl fmt::Display for DiagramType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown diagram type: {0}")]
pub struct UnknownDiagramType(pub String);

impl FromStr for DiagramType {
    type Err = UnknownDiagramType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiagramType::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| UnknownDiagramType(s.to_string()))
    }
}

impl DiagramType {
    /// Parse an identifier, falling back to the default for anything unknown.
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_identifier_falls_back_to_system_architecture() {
        assert_eq!(DiagramType::parse_or_default("flowchart"), DiagramType::SystemArchitecture);
        assert_eq!(DiagramType::parse_or_default(" data-flow "), DiagramType::DataFlow);
    }

    #[test]
    fn parses_every_identifier() {
        for t in DiagramType::ALL {
            assert_eq!(t.as_str().parse::<DiagramType>(), Ok(t));
        }
    }

    #[test]
    fn rejects_unknown_identifier() {
        let err = "flowchart".parse::<DiagramType>().expect_err("unknown");
        assert_eq!(err.to_string(), "unknown diagram type: flowchart");
    }

    #[test]
    fn serde_uses_kebab_case() {
        let json = serde_json::to_string(&DiagramType::DatabaseEr).expect("serialize");
        assert_eq!(json, "\"database-er\"");
        let back: DiagramType = serde_json::from_str("\"api-architecture\"").expect("deserialize");
        assert_eq!(back, DiagramType::ApiArchitecture);
    }
}
