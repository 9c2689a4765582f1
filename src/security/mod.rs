//! Access-control rule set (security group)

use crate::StackError;
use crate::network::Ipv4Cidr;
use crate::synth::{Construct, Resource, SynthContext, Template, intrinsic};
use serde_json::{Map, Value, json};
use std::fmt;

/// Remote-login port
pub const SSH_PORT: u16 = 22;

/// NFS port
pub const NFS_PORT: u16 = 2049;

/// Traffic source or destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    AnyIpv4,
    Cidr(Ipv4Cidr),
}

impl Peer {
    pub fn cidr_ip(&self) -> String {
        match self {
            Self::AnyIpv4 => "0.0.0.0/0".to_string(),
            Self::Cidr(cidr) => cidr.to_string(),
        }
    }

    pub fn is_any(&self) -> bool {
        match self {
            Self::AnyIpv4 => true,
            Self::Cidr(cidr) => cidr.prefix() == 0,
        }
    }
}

/// Protocol and port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Tcp(u16),
    TcpRange(u16, u16),
    AllTraffic,
}

impl Port {
    pub fn covers_tcp(&self, port: u16) -> bool {
        match *self {
            Self::Tcp(p) => p == port,
            Self::TcpRange(from, to) => (from..=to).contains(&port),
            Self::AllTraffic => true,
        }
    }

    fn write_fields(&self, rule: &mut Map<String, Value>) {
        match *self {
            Self::Tcp(p) => {
                rule.insert("IpProtocol".into(), json!("tcp"));
                rule.insert("FromPort".into(), json!(p));
                rule.insert("ToPort".into(), json!(p));
            }
            Self::TcpRange(from, to) => {
                rule.insert("IpProtocol".into(), json!("tcp"));
                rule.insert("FromPort".into(), json!(from));
                rule.insert("ToPort".into(), json!(to));
            }
            Self::AllTraffic => {
                rule.insert("IpProtocol".into(), json!("-1"));
            }
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(p) => write!(f, "tcp/{}", p),
            Self::TcpRange(from, to) => write!(f, "tcp/{}-{}", from, to),
            Self::AllTraffic => write!(f, "all traffic"),
        }
    }
}

/// One allow rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub peer: Peer,
    pub port: Port,
    pub description: String,
}

impl Rule {
    fn to_value(&self) -> Value {
        let mut rule = Map::new();
        rule.insert("CidrIp".into(), json!(self.peer.cidr_ip()));
        rule.insert("Description".into(), json!(self.description));
        self.port.write_fields(&mut rule);
        Value::Object(rule)
    }
}

/// Security group bound to the stack's VPC
#[derive(Debug, Clone)]
pub struct SecurityGroup {
    id: String,
    vpc_id: String,
    ingress: Vec<Rule>,
    egress: Vec<Rule>,
}

impl SecurityGroup {
    pub fn new(id: impl Into<String>, vpc_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vpc_id: vpc_id.into(),
            ingress: Vec::new(),
            egress: Vec::new(),
        }
    }

    pub fn add_ingress_rule(&mut self, peer: Peer, port: Port, description: impl Into<String>) {
        self.ingress.push(Rule {
            peer,
            port,
            description: description.into(),
        });
    }

    pub fn add_egress_rule(&mut self, peer: Peer, port: Port, description: impl Into<String>) {
        self.egress.push(Rule {
            peer,
            port,
            description: description.into(),
        });
    }

    pub fn ingress(&self) -> &[Rule] {
        &self.ingress
    }

    pub fn egress(&self) -> &[Rule] {
        &self.egress
    }

    /// Whether any source may reach `port` over TCP
    pub fn allows_ingress(&self, port: u16) -> bool {
        self.ingress
            .iter()
            .any(|r| r.peer.is_any() && r.port.covers_tcp(port))
    }

    pub fn allows_all_egress(&self) -> bool {
        self.egress
            .iter()
            .any(|r| r.peer.is_any() && r.port == Port::AllTraffic)
    }

    /// `Fn::GetAtt` for the group id
    pub fn group_id(&self) -> Value {
        intrinsic::get_att(&self.id, "GroupId")
    }
}

impl Construct for SecurityGroup {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        let ingress: Vec<Value> = self.ingress.iter().map(Rule::to_value).collect();
        let egress: Vec<Value> = self.egress.iter().map(Rule::to_value).collect();

        template.add_resource(
            &self.id,
            Resource::new("AWS::EC2::SecurityGroup")
                .property("GroupDescription", format!("{}/{}", ctx.stack_name, self.id))
                .property("VpcId", intrinsic::reference(&self.vpc_id))
                .property("SecurityGroupIngress", ingress)
                .property("SecurityGroupEgress", egress)
                .property("Tags", ctx.tags_named(&self.id)),
        )
    }
}
