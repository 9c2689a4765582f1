//! Virtual network
//!
//! One public and one private-with-egress subnet per availability zone. The
//! public subnets host the NAT gateways; everything the stack launches lives
//! in the private ones.

pub mod cidr;

pub use cidr::Ipv4Cidr;

use crate::StackError;
use crate::config::{MAX_PREFIX, NetworkConfig};
use crate::synth::{Construct, Resource, SynthContext, Template, intrinsic};
use serde_json::{Value, json};
use std::fmt;
use tracing::debug;

/// Subnet tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetType {
    /// Routes to the internet gateway, maps public IPs on launch
    Public,
    /// No inbound internet path; outbound through a NAT gateway
    PrivateWithEgress,
}

impl SubnetType {
    /// Name used in logical ids
    pub fn group_name(&self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::PrivateWithEgress => "Private",
        }
    }
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::PrivateWithEgress => write!(f, "private-with-egress"),
        }
    }
}

/// Availability zone reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvailabilityZone {
    /// A named zone, e.g. `us-east-1a`
    Named(String),
    /// The n-th zone of whatever region the stack is deployed to
    Indexed(usize),
}

impl AvailabilityZone {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Named(name) => json!(name),
            Self::Indexed(index) => intrinsic::select_az(*index),
        }
    }
}

/// One planned subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_type: SubnetType,
    /// 1-based position within its tier
    pub index: usize,
    pub zone: AvailabilityZone,
    pub cidr: Ipv4Cidr,
    /// Logical id prefix, e.g. `VpcPrivateSubnet1`
    pub path: String,
}

impl Subnet {
    pub fn logical_id(&self) -> String {
        format!("{}Subnet", self.path)
    }

    pub fn route_table_id(&self) -> String {
        format!("{}RouteTable", self.path)
    }

    pub fn association_id(&self) -> String {
        format!("{}RouteTableAssociation", self.path)
    }

    pub fn default_route_id(&self) -> String {
        format!("{}DefaultRoute", self.path)
    }

    pub fn eip_id(&self) -> String {
        format!("{}EIP", self.path)
    }

    pub fn nat_gateway_id(&self) -> String {
        format!("{}NATGateway", self.path)
    }
}

/// The stack's VPC and its subnet plan
#[derive(Debug, Clone)]
pub struct Vpc {
    id: String,
    cidr: Ipv4Cidr,
    subnets: Vec<Subnet>,
    nat_gateways: usize,
}

impl Vpc {
    /// Plan the subnets for `config`
    pub fn new(id: impl Into<String>, config: &NetworkConfig) -> Result<Self, StackError> {
        let id = id.into();
        let cidr: Ipv4Cidr = config.cidr.parse()?;

        let zones: Vec<AvailabilityZone> = if config.availability_zones.is_empty() {
            (0..config.max_azs).map(AvailabilityZone::Indexed).collect()
        } else {
            config
                .availability_zones
                .iter()
                .take(config.max_azs)
                .cloned()
                .map(AvailabilityZone::Named)
                .collect()
        };
        if zones.is_empty() {
            return Err(StackError::Network("at least one availability zone is required".into()));
        }

        let nat_gateways = config.nat_gateway_count();
        if nat_gateways == 0 || nat_gateways > zones.len() {
            return Err(StackError::Network(format!(
                "{} NAT gateway(s) requested for {} zone(s)",
                nat_gateways,
                zones.len()
            )));
        }

        let tiers = [SubnetType::Public, SubnetType::PrivateWithEgress];
        let blocks = cidr.subdivide(tiers.len() * zones.len())?;
        if let Some(block) = blocks.first() {
            if block.prefix() > MAX_PREFIX {
                return Err(StackError::cidr(
                    cidr.to_string(),
                    format!("subnets would be /{}, smaller than /{}", block.prefix(), MAX_PREFIX),
                ));
            }
        }

        let mut blocks = blocks.into_iter();
        let mut subnets = Vec::with_capacity(tiers.len() * zones.len());
        for subnet_type in tiers {
            for (i, zone) in zones.iter().enumerate() {
                let block = blocks
                    .next()
                    .ok_or_else(|| StackError::Network("ran out of subnet blocks".into()))?;
                subnets.push(Subnet {
                    subnet_type,
                    index: i + 1,
                    zone: zone.clone(),
                    cidr: block,
                    path: format!("{}{}Subnet{}", id, subnet_type.group_name(), i + 1),
                });
            }
        }

        debug!(
            "Planned VPC {} with {} subnet(s) across {} zone(s)",
            cidr,
            subnets.len(),
            zones.len()
        );

        Ok(Self {
            id,
            cidr,
            subnets,
            nat_gateways,
        })
    }

    pub fn cidr(&self) -> Ipv4Cidr {
        self.cidr
    }

    pub fn subnets(&self) -> &[Subnet] {
        &self.subnets
    }

    /// Subnets of one tier, in zone order
    pub fn subnets_of(&self, subnet_type: SubnetType) -> impl Iterator<Item = &Subnet> {
        self.subnets
            .iter()
            .filter(move |s| s.subnet_type == subnet_type)
    }

    pub fn zone_count(&self) -> usize {
        self.subnets_of(SubnetType::Public).count()
    }

    /// First private subnet, where single-instance resources are placed
    pub fn primary_private_subnet(&self) -> Result<&Subnet, StackError> {
        self.subnets_of(SubnetType::PrivateWithEgress)
            .next()
            .ok_or_else(|| StackError::Network("VPC has no private subnet".into()))
    }

    pub fn igw_id(&self) -> String {
        format!("{}IGW", self.id)
    }

    pub fn gateway_attachment_id(&self) -> String {
        format!("{}VPCGW", self.id)
    }

    /// Public subnet whose NAT gateway serves the `index`-th private subnet
    fn nat_subnet_for(&self, index: usize) -> Option<&Subnet> {
        let slot = (index - 1) % self.nat_gateways;
        self.subnets_of(SubnetType::Public).nth(slot)
    }

    fn synth_public(
        &self,
        ctx: &SynthContext,
        subnet: &Subnet,
        template: &mut Template,
    ) -> Result<(), StackError> {
        template.add_resource(
            subnet.route_table_id(),
            Resource::new("AWS::EC2::RouteTable")
                .property("VpcId", intrinsic::reference(&self.id))
                .property("Tags", ctx.tags_named(&subnet.path)),
        )?;
        template.add_resource(
            subnet.default_route_id(),
            Resource::new("AWS::EC2::Route")
                .property("RouteTableId", intrinsic::reference(&subnet.route_table_id()))
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .property("GatewayId", intrinsic::reference(&self.igw_id()))
                .depends_on(self.gateway_attachment_id()),
        )?;

        if subnet.index <= self.nat_gateways {
            template.add_resource(
                subnet.eip_id(),
                Resource::new("AWS::EC2::EIP")
                    .property("Domain", "vpc")
                    .property("Tags", ctx.tags_named(&subnet.path)),
            )?;
            template.add_resource(
                subnet.nat_gateway_id(),
                Resource::new("AWS::EC2::NatGateway")
                    .property("AllocationId", intrinsic::get_att(&subnet.eip_id(), "AllocationId"))
                    .property("SubnetId", intrinsic::reference(&subnet.logical_id()))
                    .property("Tags", ctx.tags_named(&subnet.path))
                    .depends_on(subnet.default_route_id())
                    .depends_on(subnet.association_id()),
            )?;
        }
        Ok(())
    }

    fn synth_private(
        &self,
        ctx: &SynthContext,
        subnet: &Subnet,
        template: &mut Template,
    ) -> Result<(), StackError> {
        let nat = self
            .nat_subnet_for(subnet.index)
            .ok_or_else(|| StackError::Network("no NAT gateway for private subnet".into()))?;

        template.add_resource(
            subnet.route_table_id(),
            Resource::new("AWS::EC2::RouteTable")
                .property("VpcId", intrinsic::reference(&self.id))
                .property("Tags", ctx.tags_named(&subnet.path)),
        )?;
        template.add_resource(
            subnet.default_route_id(),
            Resource::new("AWS::EC2::Route")
                .property("RouteTableId", intrinsic::reference(&subnet.route_table_id()))
                .property("DestinationCidrBlock", "0.0.0.0/0")
                .property("NatGatewayId", intrinsic::reference(&nat.nat_gateway_id())),
        )?;
        Ok(())
    }
}

impl Construct for Vpc {
    fn id(&self) -> &str {
        &self.id
    }

    fn synthesize(&self, ctx: &SynthContext, template: &mut Template) -> Result<(), StackError> {
        template.add_resource(
            &self.id,
            Resource::new("AWS::EC2::VPC")
                .property("CidrBlock", self.cidr.to_string())
                .property("EnableDnsHostnames", true)
                .property("EnableDnsSupport", true)
                .property("InstanceTenancy", "default")
                .property("Tags", ctx.tags_named(&self.id)),
        )?;

        for subnet in &self.subnets {
            let public = subnet.subnet_type == SubnetType::Public;
            template.add_resource(
                subnet.logical_id(),
                Resource::new("AWS::EC2::Subnet")
                    .property("VpcId", intrinsic::reference(&self.id))
                    .property("AvailabilityZone", subnet.zone.to_value())
                    .property("CidrBlock", subnet.cidr.to_string())
                    .property("MapPublicIpOnLaunch", public)
                    .property("Tags", ctx.tags_named(&subnet.path)),
            )?;
            template.add_resource(
                subnet.association_id(),
                Resource::new("AWS::EC2::SubnetRouteTableAssociation")
                    .property("RouteTableId", intrinsic::reference(&subnet.route_table_id()))
                    .property("SubnetId", intrinsic::reference(&subnet.logical_id())),
            )?;

            match subnet.subnet_type {
                SubnetType::Public => self.synth_public(ctx, subnet, template)?,
                SubnetType::PrivateWithEgress => self.synth_private(ctx, subnet, template)?,
            }
        }

        template.add_resource(
            self.igw_id(),
            Resource::new("AWS::EC2::InternetGateway").property("Tags", ctx.tags_named(&self.id)),
        )?;
        template.add_resource(
            self.gateway_attachment_id(),
            Resource::new("AWS::EC2::VPCGatewayAttachment")
                .property("VpcId", intrinsic::reference(&self.id))
                .property("InternetGatewayId", intrinsic::reference(&self.igw_id())),
        )?;

        Ok(())
    }
}
