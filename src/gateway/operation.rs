/// Every call the gateway serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterPublisher,
    UnregisterPublisher,
    RegisterSubscriber,
    UnregisterSubscriber,
    RegisterService,
    UnregisterService,
    LookupService,
    LookupNode,
    GetPublishedTopics,
    GetSystemState,
    GetUri,
    GetPid,
    GetTopicTypes,
    GetRvState,
    SetParam,
    GetParam,
    HasParam,
    DeleteParam,
    GetParamNames,
    SearchParam,
    SubscribeParam,
    UnsubscribeParam,
    PublisherUpdate,
}

/// Which policy check guards an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// `is_command_allowed` with [`Operation::command`].
    Command,
    /// `is_publisher_allowed` on the request topic.
    Publisher,
    /// `is_subscriber_allowed` on the request topic.
    Subscriber,
}

impl Operation {
    pub const ALL: [Operation; 23] = [
        Operation::RegisterPublisher,
        Operation::UnregisterPublisher,
        Operation::RegisterSubscriber,
        Operation::UnregisterSubscriber,
        Operation::RegisterService,
        Operation::UnregisterService,
        Operation::LookupService,
        Operation::LookupNode,
        Operation::GetPublishedTopics,
        Operation::GetSystemState,
        Operation::GetUri,
        Operation::GetPid,
        Operation::GetTopicTypes,
        Operation::GetRvState,
        Operation::SetParam,
        Operation::GetParam,
        Operation::HasParam,
        Operation::DeleteParam,
        Operation::GetParamNames,
        Operation::SearchParam,
        Operation::SubscribeParam,
        Operation::UnsubscribeParam,
        Operation::PublisherUpdate,
    ];

    /// The RPC method name.
    pub fn name(self) -> &'static str {
        match self {
            Operation::RegisterPublisher => "registerPublisher",
            Operation::UnregisterPublisher => "unregisterPublisher",
            Operation::RegisterSubscriber => "registerSubscriber",
            Operation::UnregisterSubscriber => "unregisterSubscriber",
            Operation::RegisterService => "registerService",
            Operation::UnregisterService => "unregisterService",
            Operation::LookupService => "lookupService",
            Operation::LookupNode => "lookupNode",
            Operation::GetPublishedTopics => "getPublishedTopics",
            Operation::GetSystemState => "getSystemState",
            Operation::GetUri => "getUri",
            Operation::GetPid => "getPid",
            Operation::GetTopicTypes => "getTopicTypes",
            Operation::GetRvState => "getRVState",
            Operation::SetParam => "setParam",
            Operation::GetParam => "getParam",
            Operation::HasParam => "hasParam",
            Operation::DeleteParam => "deleteParam",
            Operation::GetParamNames => "getParamNames",
            Operation::SearchParam => "searchParam",
            Operation::SubscribeParam => "subscribeParam",
            Operation::UnsubscribeParam => "unsubscribeParam",
            Operation::PublisherUpdate => "publisherUpdate",
        }
    }

    pub fn from_name(name: &str) -> Option<Operation> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    /// Command name passed to the policy.
    ///
    /// Same as [`Self::name`] except that listing parameter names needs the
    /// `getParam` right.
    pub fn command(self) -> &'static str {
        match self {
            Operation::GetParamNames => Operation::GetParam.name(),
            op => op.name(),
        }
    }

    pub fn access(self) -> Access {
        match self {
            Operation::RegisterPublisher | Operation::UnregisterPublisher => Access::Publisher,
            Operation::RegisterSubscriber | Operation::UnregisterSubscriber => Access::Subscriber,
            _ => Access::Command,
        }
    }

    /// Whether the call is answered without an upstream round trip.
    pub fn is_local(self) -> bool {
        matches!(self, Operation::GetRvState)
    }

    pub fn help(self) -> &'static str {
        match self {
            Operation::RegisterPublisher => {
                "registerPublisher(callerId, topic, datatype, callerUri): register the caller as a publisher of topic. Returns the current subscriber URIs."
            }
            Operation::UnregisterPublisher => {
                "unregisterPublisher(callerId, topic, callerUri): unregister the caller as a publisher of topic."
            }
            Operation::RegisterSubscriber => {
                "registerSubscriber(callerId, topic, datatype, callerUri): subscribe the caller to topic. Returns the publisher URIs."
            }
            Operation::UnregisterSubscriber => {
                "unregisterSubscriber(callerId, topic, callerUri): unregister the caller as a subscriber of topic."
            }
            Operation::RegisterService => {
                "registerService(callerId, service, serviceUri, callerUri): register the caller as a provider of service."
            }
            Operation::UnregisterService => {
                "unregisterService(callerId, service, serviceUri): unregister the caller as a provider of service."
            }
            Operation::LookupService => "lookupService(callerId, service): the URI of service.",
            Operation::LookupNode => "lookupNode(callerId, nodeName): the XML-RPC URI of a node.",
            Operation::GetPublishedTopics => {
                "getPublishedTopics(callerId, subgraph): [topic, type] pairs of published topics, restricted to subgraph when not empty."
            }
            Operation::GetSystemState => {
                "getSystemState(callerId): [publishers, subscribers, services] of the graph."
            }
            Operation::GetUri => "getUri(callerId): the URI of the master.",
            Operation::GetPid => "getPid(callerId): the process id of the master.",
            Operation::GetTopicTypes => "getTopicTypes(callerId): [topic, type] pairs of all topics.",
            Operation::GetRvState => {
                "getRVState(callerId): [upstreamPort, gatewayPort, monitors] of this gateway."
            }
            Operation::SetParam => "setParam(callerId, key, value): set a parameter.",
            Operation::GetParam => "getParam(callerId, key): the value of a parameter.",
            Operation::HasParam => "hasParam(callerId, key): whether a parameter is set.",
            Operation::DeleteParam => "deleteParam(callerId, key): delete a parameter.",
            Operation::GetParamNames => "getParamNames(callerId): the names of all parameters.",
            Operation::SearchParam => {
                "searchParam(callerId, key): the closest key visible from the caller namespace, searching upwards."
            }
            Operation::SubscribeParam => {
                "subscribeParam(callerId, callerUri, key): receive updates of a parameter."
            }
            Operation::UnsubscribeParam => {
                "unsubscribeParam(callerId, callerUri, key): stop receiving updates of a parameter."
            }
            Operation::PublisherUpdate => {
                "publisherUpdate(callerId, topic, publishers): notify of a new publisher list for topic."
            }
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

