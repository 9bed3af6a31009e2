pub use self::{
    address::Address,
    call::{
        CallArg, CallValue, EthCall, Function, RetKind, RpcErrorBody,
        RpcReply, RpcRequest,
    },
    price::{PriceQuote, PriceSource},
    vault::{
        EndpointInfo, FleetSummary, LoanRecord, UserPosition,
        UserPositionsSummary, VaultRecord, VaultStats,
    },
};

mod address;
mod call;
mod price;
mod vault;
